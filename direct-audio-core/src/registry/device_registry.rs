use crate::models::audio_models::{DeviceDescriptor, Direction, Encoding, FormatDescriptor, StreamFormat};
use crate::models::error::AudioError;
use crate::traits::audio_host::AudioHost;

/// Snapshot of a host's devices, addressed by mixer index.
///
/// Indices are positions in the last enumeration and stay stable until the
/// next `refresh`. Lines that are already open keep working across a
/// refresh since they hold their own copy of the descriptor.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with a fresh enumeration of `host`.
    ///
    /// On failure the previous snapshot is kept.
    pub fn refresh(&mut self, host: &dyn AudioHost) -> Result<usize, AudioError> {
        let devices = host.enumerate_devices()?;
        log::info!("{} host reports {} device(s)", host.name(), devices.len());
        for (index, device) in devices.iter().enumerate() {
            log::debug!(
                "  [{}] {} ({}): {} in / {} out, {} ch",
                index,
                device.name,
                device.id,
                device.input_stream_count,
                device.output_stream_count,
                device.channel_count
            );
        }
        self.devices = devices;
        Ok(self.devices.len())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, mixer_index: usize) -> Result<&DeviceDescriptor, AudioError> {
        self.devices.get(mixer_index).ok_or_else(|| {
            AudioError::DeviceNotAvailable(format!(
                "mixer index {} out of range ({} devices)",
                mixer_index,
                self.devices.len()
            ))
        })
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Formats a line in `direction` on this device accepts.
    pub fn formats(&self, mixer_index: usize, direction: Direction) -> Result<Vec<FormatDescriptor>, AudioError> {
        Ok(supported_formats(self.device(mixer_index)?, direction))
    }

    /// Resolve an open request to a device, checking the device identity and
    /// that `format` is among the formats it accepts.
    pub fn negotiate(
        &self,
        mixer_index: usize,
        device_id: &str,
        direction: Direction,
        format: &StreamFormat,
    ) -> Result<DeviceDescriptor, AudioError> {
        let device = self.device(mixer_index)?;
        if device.id != device_id {
            return Err(AudioError::DeviceNotAvailable(format!(
                "mixer index {} is now {}, not {}",
                mixer_index, device.id, device_id
            )));
        }
        format.validate()?;

        let formats = supported_formats(device, direction);
        if formats.is_empty() {
            return Err(AudioError::DeviceNotAvailable(format!(
                "{} has no {} streams",
                device.name,
                direction.label()
            )));
        }
        if !formats.iter().any(|f| f.matches(format)) {
            return Err(AudioError::FormatNotSupported(format!(
                "{} bits, {} ch, {} Hz on {}",
                format.sample_size_bits, format.channels, format.sample_rate, device.name
            )));
        }
        Ok(device.clone())
    }
}

/// 16-bit signed native-endian PCM at any rate, for mono, stereo and, on
/// wider devices, the full channel count.
pub fn supported_formats(device: &DeviceDescriptor, direction: Direction) -> Vec<FormatDescriptor> {
    if device.stream_count(direction) == 0 {
        return Vec::new();
    }

    let mut channel_counts = vec![1, 2];
    if device.channel_count > 2 {
        channel_counts.push(device.channel_count);
    }

    channel_counts
        .into_iter()
        .map(|channels| FormatDescriptor {
            sample_size_bits: 16,
            frame_size: None,
            channels,
            sample_rate: None,
            encoding: Encoding::Pcm,
            signed: true,
            big_endian: cfg!(target_endian = "big"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::virtual_host::{VirtualClock, VirtualHost};

    fn registry() -> DeviceRegistry {
        let host = VirtualHost::new(VirtualClock::Manual);
        let mut registry = DeviceRegistry::new();
        registry.refresh(&host).unwrap();
        registry
    }

    #[test]
    fn refresh_snapshots_devices() {
        let registry = registry();
        assert_eq!(registry.device_count(), 3);
        assert_eq!(registry.device(1).unwrap().id, "virtual-microphone");
        assert!(matches!(registry.device(3), Err(AudioError::DeviceNotAvailable(_))));
    }

    #[test]
    fn formats_follow_stream_direction() {
        let registry = registry();
        assert_eq!(registry.formats(0, Direction::Source).unwrap().len(), 2);
        assert!(registry.formats(0, Direction::Target).unwrap().is_empty());
        assert!(registry.formats(1, Direction::Source).unwrap().is_empty());
    }

    #[test]
    fn wide_devices_add_full_channel_count() {
        let registry = registry();
        let channels: Vec<u16> = registry
            .formats(2, Direction::Target)
            .unwrap()
            .iter()
            .map(|f| f.channels)
            .collect();
        assert_eq!(channels, vec![1, 2, 8]);
    }

    #[test]
    fn negotiate_accepts_listed_format() {
        let registry = registry();
        let device = registry
            .negotiate(2, "virtual-interface", Direction::Source, &StreamFormat::pcm16(44100.0, 8))
            .unwrap();
        assert_eq!(device.channel_count, 8);
    }

    #[test]
    fn negotiate_rejects_mismatches() {
        let registry = registry();
        let stereo = StreamFormat::pcm16(48000.0, 2);

        assert!(matches!(
            registry.negotiate(0, "virtual-microphone", Direction::Source, &stereo),
            Err(AudioError::DeviceNotAvailable(_))
        ));
        assert!(matches!(
            registry.negotiate(0, "virtual-speakers", Direction::Target, &stereo),
            Err(AudioError::DeviceNotAvailable(_))
        ));
        assert!(matches!(
            registry.negotiate(0, "virtual-speakers", Direction::Source, &StreamFormat::pcm16(48000.0, 6)),
            Err(AudioError::FormatNotSupported(_))
        ));

        let mut swapped = stereo;
        swapped.big_endian = !swapped.big_endian;
        assert!(matches!(
            registry.negotiate(0, "virtual-speakers", Direction::Source, &swapped),
            Err(AudioError::FormatNotSupported(_))
        ));
    }

    #[test]
    fn refresh_picks_up_new_devices() {
        let host = VirtualHost::new(VirtualClock::Manual);
        let mut registry = DeviceRegistry::new();
        registry.refresh(&host).unwrap();

        host.remove_device("virtual-interface");
        assert_eq!(registry.refresh(&host).unwrap(), 2);

        host.add_device(DeviceDescriptor {
            id: "usb-headset".into(),
            name: "USB Headset".into(),
            vendor: "Acme".into(),
            description: "USB headset".into(),
            input_stream_count: 1,
            output_stream_count: 1,
            channel_count: 1,
        });
        assert_eq!(registry.refresh(&host).unwrap(), 3);
        assert_eq!(registry.device(2).unwrap().id, "usb-headset");
        assert!(registry
            .negotiate(2, "usb-headset", Direction::Target, &StreamFormat::pcm16(16000.0, 1))
            .is_ok());
    }
}
