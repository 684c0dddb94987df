//! # direct-audio-core
//!
//! Platform-agnostic core of the direct audio line library.
//!
//! A line is a single-direction PCM stream on one device: playback
//! ("source") lines take bytes from the application and feed the hardware,
//! capture ("target") lines do the reverse. Each line decouples the
//! application thread from the host's real-time callback with a lock-light
//! ring buffer. Platform backends implement the `AudioHost` trait and plug
//! into the generic `DirectAudio` front end.
//!
//! ## Architecture
//!
//! ```text
//! direct-audio-core (this crate)
//! ├── traits/       ← AudioHost, HardwareStream, HardwareCallback, InputSource
//! ├── models/       ← AudioError, LineState, LineConfiguration, StreamFormat, etc.
//! ├── processing/   ← RingBuffer, HardwareCallbackAdapter
//! ├── registry/     ← DeviceRegistry, format negotiation
//! ├── session/      ← DeviceSession (one line), DirectAudio (handle table)
//! └── host/         ← VirtualHost (in-memory devices)
//! ```

pub mod host;
pub mod models;
pub mod processing;
pub mod registry;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use host::virtual_host::{VirtualClock, VirtualHost, VirtualStreamHandle};
pub use models::audio_models::{
    DeviceDescriptor, Direction, Encoding, FormatDescriptor, LineDiagnostics, StreamFormat,
};
pub use models::config::LineConfiguration;
pub use models::error::AudioError;
pub use models::state::LineState;
pub use processing::callback::HardwareCallbackAdapter;
pub use processing::ring_buffer::RingBuffer;
pub use registry::device_registry::{supported_formats, DeviceRegistry};
pub use session::device_session::DeviceSession;
pub use session::direct_audio::{DirectAudio, LineHandle, LineRequest};
pub use traits::audio_host::{
    AudioHost, CaptureCallback, HardwareCallback, HardwareStream, InputSource, RenderCallback,
};
