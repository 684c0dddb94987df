use crate::models::audio_models::{DeviceDescriptor, Direction, StreamFormat};
use crate::models::config::LineConfiguration;
use crate::models::error::AudioError;

/// Source of captured frames, handed to a capture callback by the host.
pub trait InputSource {
    /// Copy `frames` frames of captured audio into `dst`
    /// (`dst.len() == frames * frame_size`).
    fn pull(&mut self, frames: u32, dst: &mut [u8]) -> Result<(), AudioError>;
}

/// Playback callback: fill the hardware buffer with `frames` frames.
/// The slice may be larger than `frames * frame_size`.
pub type RenderCallback = Box<dyn FnMut(&mut [u8], u32) + Send + 'static>;

/// Capture callback: pull `frames` frames from the input source.
pub type CaptureCallback = Box<dyn FnMut(&mut dyn InputSource, u32) + Send + 'static>;

/// Function the host invokes on its real-time audio thread once per period.
///
/// The host calls it from a single thread at a time, and it must never
/// block beyond O(1) bookkeeping.
pub enum HardwareCallback {
    Render(RenderCallback),
    Capture(CaptureCallback),
}

impl HardwareCallback {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Render(_) => Direction::Source,
            Self::Capture(_) => Direction::Target,
        }
    }
}

/// One hardware stream (an audio unit, an endpoint client, ...) opened for a
/// fixed direction and format.
///
/// Lifecycle: `set_callback` → `start` ↔ `stop` → `close`. Once `stop` or
/// `close` returns, the callback is not running and will not be invoked
/// again until the next `start`.
pub trait HardwareStream: Send {
    /// Frames the host asks for per callback.
    fn period_frames(&self) -> u32;

    /// Install the callback. Must be called before `start`.
    fn set_callback(&mut self, callback: HardwareCallback) -> Result<(), AudioError>;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self) -> Result<(), AudioError>;

    /// Stop delivery and release the device. Idempotent.
    fn close(&mut self);
}

/// A platform audio API: device enumeration plus stream creation.
///
/// Implemented by:
/// - `VirtualHost` (in-memory devices, this crate)
/// - `WasapiHost` (Windows)
pub trait AudioHost: Send + Sync {
    /// Short host name for log lines.
    fn name(&self) -> &str;

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, AudioError>;

    /// Acquire `device` for `direction` using the already-negotiated `format`.
    fn open_stream(
        &self,
        device: &DeviceDescriptor,
        direction: Direction,
        format: &StreamFormat,
        config: &LineConfiguration,
    ) -> Result<Box<dyn HardwareStream>, AudioError>;
}
