use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::audio_models::{DeviceDescriptor, Direction, FormatDescriptor, LineDiagnostics, StreamFormat};
use crate::models::config::LineConfiguration;
use crate::models::error::AudioError;
use crate::models::state::LineState;
use crate::registry::device_registry::DeviceRegistry;
use crate::session::device_session::DeviceSession;
use crate::traits::audio_host::AudioHost;

/// Opaque identifier of an open line. Never reused within one `DirectAudio`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineHandle(u64);

impl LineHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything needed to open a line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRequest {
    /// Position of the device in the last enumeration.
    pub mixer_index: usize,
    /// Identity the caller saw at that index; guards against a stale index
    /// after a device refresh.
    pub device_id: String,
    pub direction: Direction,
    pub format: StreamFormat,
    /// Requested ring capacity. 0 selects the configured default duration.
    pub buffer_size_bytes: usize,
}

/// Entry point for applications: device queries plus the line lifecycle.
///
/// ```text
/// DirectAudio
/// ├── host        ← enumerates devices, opens hardware streams
/// ├── registry    ← device snapshot addressed by mixer index
/// └── lines       ← handle → DeviceSession
/// ```
///
/// Every method takes `&self`; the instance can be shared between threads
/// so one thread may stop or close a line another is reading from.
pub struct DirectAudio<H: AudioHost> {
    host: H,
    config: LineConfiguration,
    registry: RwLock<DeviceRegistry>,
    lines: RwLock<HashMap<LineHandle, Arc<DeviceSession>>>,
    next_handle: AtomicU64,
}

impl<H: AudioHost> DirectAudio<H> {
    /// Validate `config` and take the first device snapshot.
    pub fn new(host: H, config: LineConfiguration) -> Result<Self, AudioError> {
        config.validate().map_err(AudioError::ConfigurationFailed)?;

        let mut registry = DeviceRegistry::new();
        registry.refresh(&host)?;

        Ok(Self {
            host,
            config,
            registry: RwLock::new(registry),
            lines: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &LineConfiguration {
        &self.config
    }

    /// Re-enumerate devices. Open lines are unaffected.
    pub fn refresh_devices(&self) -> Result<usize, AudioError> {
        self.registry.write().refresh(&self.host)
    }

    pub fn device_count(&self) -> usize {
        self.registry.read().device_count()
    }

    pub fn device_description(&self, mixer_index: usize) -> Result<DeviceDescriptor, AudioError> {
        self.registry.read().device(mixer_index).cloned()
    }

    pub fn formats(&self, mixer_index: usize, direction: Direction) -> Result<Vec<FormatDescriptor>, AudioError> {
        self.registry.read().formats(mixer_index, direction)
    }

    pub fn open(&self, request: LineRequest) -> Result<LineHandle, AudioError> {
        let device = self.registry.read().negotiate(
            request.mixer_index,
            &request.device_id,
            request.direction,
            &request.format,
        )?;

        let session = DeviceSession::open(
            &self.host,
            &device,
            request.direction,
            request.format,
            request.buffer_size_bytes,
            &self.config,
        )?;

        let handle = LineHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        log::debug!("line {} bound to handle {}", session.id(), handle);
        self.lines.write().insert(handle, Arc::new(session));
        Ok(handle)
    }

    pub fn start(&self, handle: LineHandle) -> Result<(), AudioError> {
        self.line(handle)?.start()
    }

    pub fn stop(&self, handle: LineHandle) -> Result<(), AudioError> {
        self.line(handle)?.stop()
    }

    pub fn write(&self, handle: LineHandle, data: &[u8]) -> Result<usize, AudioError> {
        self.line(handle)?.write(data)
    }

    /// Blocking capture read. Does not hold any table lock while waiting.
    pub fn read(&self, handle: LineHandle, buf: &mut [u8]) -> Result<usize, AudioError> {
        self.line(handle)?.read(buf)
    }

    pub fn buffer_size(&self, handle: LineHandle) -> Result<usize, AudioError> {
        Ok(self.line(handle)?.buffer_size())
    }

    pub fn available(&self, handle: LineHandle) -> Result<usize, AudioError> {
        self.line(handle)?.available()
    }

    pub fn byte_position(&self, handle: LineHandle, reference: i64) -> Result<i64, AudioError> {
        self.line(handle)?.byte_position(reference)
    }

    pub fn set_byte_position(&self, handle: LineHandle, position: i64) -> Result<(), AudioError> {
        self.line(handle)?.set_byte_position(position);
        Ok(())
    }

    pub fn is_still_draining(&self, handle: LineHandle) -> Result<bool, AudioError> {
        self.line(handle)?.is_still_draining()
    }

    pub fn flush(&self, handle: LineHandle) -> Result<usize, AudioError> {
        self.line(handle)?.flush()
    }

    pub fn state(&self, handle: LineHandle) -> Result<LineState, AudioError> {
        Ok(self.line(handle)?.state())
    }

    pub fn diagnostics(&self, handle: LineHandle) -> Result<LineDiagnostics, AudioError> {
        self.line(handle)?.diagnostics()
    }

    /// Close the line and forget the handle. A reader blocked on it returns.
    pub fn close(&self, handle: LineHandle) -> Result<(), AudioError> {
        let session = self
            .lines
            .write()
            .remove(&handle)
            .ok_or(AudioError::InvalidHandle(handle.raw()))?;
        session.close();
        Ok(())
    }

    pub fn open_lines(&self) -> Vec<LineHandle> {
        let mut handles: Vec<LineHandle> = self.lines.read().keys().copied().collect();
        handles.sort_by_key(LineHandle::raw);
        handles
    }

    fn line(&self, handle: LineHandle) -> Result<Arc<DeviceSession>, AudioError> {
        self.lines
            .read()
            .get(&handle)
            .cloned()
            .ok_or(AudioError::InvalidHandle(handle.raw()))
    }
}

impl<H: AudioHost> Drop for DirectAudio<H> {
    fn drop(&mut self) {
        let lines: Vec<_> = self.lines.write().drain().collect();
        if !lines.is_empty() {
            log::info!("closing {} line(s) still open on {}", lines.len(), self.host.name());
        }
        for (_, session) in lines {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::host::virtual_host::{VirtualClock, VirtualHost};

    fn audio() -> DirectAudio<VirtualHost> {
        let host = VirtualHost::new(VirtualClock::Manual).with_period_frames(4);
        DirectAudio::new(host, LineConfiguration::default()).unwrap()
    }

    fn request(audio: &DirectAudio<VirtualHost>, index: usize, direction: Direction) -> LineRequest {
        LineRequest {
            mixer_index: index,
            device_id: audio.device_description(index).unwrap().id,
            direction,
            format: StreamFormat::pcm16(8000.0, 2),
            buffer_size_bytes: 64,
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        let host = VirtualHost::new(VirtualClock::Manual);
        let config = LineConfiguration {
            period_millis: 0,
            ..Default::default()
        };
        assert!(matches!(
            DirectAudio::new(host, config),
            Err(AudioError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn device_queries() {
        let audio = audio();
        assert_eq!(audio.device_count(), 3);
        assert_eq!(audio.device_description(0).unwrap().name, "Virtual Speakers");
        assert_eq!(audio.formats(2, Direction::Source).unwrap().len(), 3);
        assert!(audio.device_description(9).is_err());
    }

    #[test]
    fn playback_line_lifecycle() {
        let audio = audio();
        let handle = audio.open(request(&audio, 0, Direction::Source)).unwrap();
        let stream = audio.host().last_stream().unwrap();

        assert_eq!(audio.buffer_size(handle).unwrap(), 64);
        assert_eq!(audio.write(handle, &[4; 16]).unwrap(), 16);
        audio.start(handle).unwrap();
        assert_eq!(audio.state(handle).unwrap(), LineState::Started);

        stream.tick();
        assert_eq!(stream.rendered(), vec![4u8; 16]);
        assert_eq!(audio.byte_position(handle, 16).unwrap(), 16);
        assert!(!audio.is_still_draining(handle).unwrap());

        audio.stop(handle).unwrap();
        audio.close(handle).unwrap();
        assert!(stream.is_closed());
        assert_eq!(audio.write(handle, &[0; 4]), Err(AudioError::InvalidHandle(handle.raw())));
        assert_eq!(audio.close(handle), Err(AudioError::InvalidHandle(handle.raw())));
    }

    #[test]
    fn capture_line_reads_ticks() {
        let audio = audio();
        let handle = audio.open(request(&audio, 1, Direction::Target)).unwrap();
        let stream = audio.host().last_stream().unwrap();
        audio.start(handle).unwrap();

        stream.tick();
        assert_eq!(audio.available(handle).unwrap(), 16);

        let mut buf = [0u8; 8];
        assert_eq!(audio.read(handle, &mut buf).unwrap(), 8);
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(audio.byte_position(handle, 8).unwrap(), 16);

        assert_eq!(audio.flush(handle).unwrap(), 8);
        assert_eq!(audio.diagnostics(handle).unwrap().flush_count, 1);
    }

    #[test]
    fn stale_device_id_is_rejected() {
        let audio = audio();
        let mut request = request(&audio, 0, Direction::Source);
        request.device_id = "virtual-microphone".into();
        assert!(matches!(audio.open(request), Err(AudioError::DeviceNotAvailable(_))));
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let audio = audio();
        let mut request = request(&audio, 0, Direction::Source);
        request.format = StreamFormat::pcm16(8000.0, 4);
        assert!(matches!(audio.open(request), Err(AudioError::FormatNotSupported(_))));
        assert!(audio.host().last_stream().is_none());
    }

    #[test]
    fn handles_are_unique() {
        let audio = audio();
        let first = audio.open(request(&audio, 0, Direction::Source)).unwrap();
        let second = audio.open(request(&audio, 0, Direction::Source)).unwrap();
        assert_ne!(first, second);
        assert_eq!(audio.open_lines(), vec![first, second]);

        audio.close(first).unwrap();
        let third = audio.open(request(&audio, 0, Direction::Source)).unwrap();
        assert_ne!(third, first);
    }

    #[test]
    fn refresh_keeps_open_lines() {
        let audio = audio();
        let handle = audio.open(request(&audio, 2, Direction::Source)).unwrap();

        audio.host().remove_device("virtual-interface");
        assert_eq!(audio.refresh_devices().unwrap(), 2);
        assert_eq!(audio.write(handle, &[1; 8]).unwrap(), 8);
    }

    #[test]
    fn close_from_another_thread_unblocks_read() {
        let audio = Arc::new(audio());
        let handle = audio.open(request(&audio, 1, Direction::Target)).unwrap();
        audio.start(handle).unwrap();

        let reader = {
            let audio = Arc::clone(&audio);
            thread::spawn(move || audio.read(handle, &mut [0u8; 32]))
        };

        thread::sleep(Duration::from_millis(50));
        audio.close(handle).unwrap();

        assert!(matches!(
            reader.join().unwrap(),
            Ok(0) | Err(AudioError::InvalidState(_)) | Err(AudioError::InvalidHandle(_))
        ));
    }

    #[test]
    fn drop_closes_open_lines() {
        let audio = audio();
        audio.open(request(&audio, 0, Direction::Source)).unwrap();
        let stream = audio.host().last_stream().unwrap();

        drop(audio);
        assert!(stream.is_closed());
    }
}
