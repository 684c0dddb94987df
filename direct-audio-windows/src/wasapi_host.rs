//! WASAPI implementation of `AudioHost`.

use direct_audio_core::models::audio_models::{DeviceDescriptor, Direction, StreamFormat};
use direct_audio_core::models::config::LineConfiguration;
use direct_audio_core::models::error::AudioError;
use direct_audio_core::traits::audio_host::{AudioHost, HardwareStream};

use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::wasapi_stream::WasapiStream;

/// Shared-mode WASAPI host.
///
/// Holds no COM objects itself: enumeration initialises COM on the calling
/// thread for the duration of the call, and every stream runs its own COM
/// thread.
///
/// ```ignore
/// use direct_audio_core::{DirectAudio, LineConfiguration};
/// use direct_audio_windows::WasapiHost;
///
/// let audio = DirectAudio::new(WasapiHost::new(), LineConfiguration::default())?;
/// ```
#[derive(Debug, Default)]
pub struct WasapiHost;

impl WasapiHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHost for WasapiHost {
    fn name(&self) -> &str {
        "wasapi"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
        let _com = ComScope::enter()?;
        let devices = DeviceEnumerator::new()?.list_devices()?;
        Ok(devices)
    }

    fn open_stream(
        &self,
        device: &DeviceDescriptor,
        direction: Direction,
        format: &StreamFormat,
        config: &LineConfiguration,
    ) -> Result<Box<dyn HardwareStream>, AudioError> {
        if device.stream_count(direction) == 0 {
            return Err(AudioError::DeviceNotAvailable(format!(
                "{} has no {} streams",
                device.name,
                direction.label()
            )));
        }
        let stream = WasapiStream::open(&device.id, direction, format, config)?;
        Ok(Box::new(stream))
    }
}
