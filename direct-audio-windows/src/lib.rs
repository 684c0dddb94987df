//! # direct-audio-windows
//!
//! Windows WASAPI backend for direct-audio lines.
//!
//! Provides:
//! - `WasapiHost`: `AudioHost` over shared-mode WASAPI endpoints
//! - `WasapiStream`: one endpoint client driven on an MMCSS thread
//! - `DeviceEnumerator`: endpoint enumeration via the MMDevice API
//! - `permissions`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1803+ for the microphone privacy setting
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use direct_audio_core::{DirectAudio, Direction, LineConfiguration, LineRequest, StreamFormat};
//! use direct_audio_windows::WasapiHost;
//!
//! let audio = DirectAudio::new(WasapiHost::new(), LineConfiguration::default())?;
//! let speakers = audio.device_description(0)?;
//! let line = audio.open(LineRequest {
//!     mixer_index: 0,
//!     device_id: speakers.id,
//!     direction: Direction::Source,
//!     format: StreamFormat::pcm16(48000.0, 2),
//!     buffer_size_bytes: 0,
//! })?;
//! audio.start(line)?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_host;
#[cfg(target_os = "windows")]
pub mod wasapi_stream;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use wasapi_host::WasapiHost;
#[cfg(target_os = "windows")]
pub use wasapi_stream::WasapiStream;
