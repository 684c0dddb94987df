//! WASAPI-level failures and their mapping onto `AudioError`.

use thiserror::Error;
use windows::Win32::Foundation::E_ACCESSDENIED;

use direct_audio_core::models::error::AudioError;

/// `AUDCLNT_E_DEVICE_INVALIDATED`: the endpoint was unplugged or disabled.
const DEVICE_INVALIDATED: i32 = 0x8889_0004_u32 as i32;
/// `AUDCLNT_E_UNSUPPORTED_FORMAT`.
const UNSUPPORTED_FORMAT: i32 = 0x8889_0008_u32 as i32;
/// `AUDCLNT_E_DEVICE_IN_USE`: another client holds it exclusively.
const DEVICE_IN_USE: i32 = 0x8889_000A_u32 as i32;

#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("microphone access is disabled in privacy settings")]
    AccessDenied,

    #[error("stream thread exited")]
    ThreadGone,
}

impl WasapiError {
    fn code(&self) -> Option<i32> {
        match self {
            Self::Call { source, .. } => Some(source.code().0),
            _ => None,
        }
    }
}

impl From<WasapiError> for AudioError {
    fn from(e: WasapiError) -> Self {
        match e.code() {
            Some(code) if code == E_ACCESSDENIED.0 => return AudioError::PermissionDenied,
            Some(UNSUPPORTED_FORMAT) => return AudioError::FormatNotSupported(e.to_string()),
            Some(DEVICE_INVALIDATED) | Some(DEVICE_IN_USE) => {
                return AudioError::DeviceNotAvailable(e.to_string())
            }
            _ => {}
        }
        match e {
            WasapiError::EndpointNotFound(id) => AudioError::DeviceNotAvailable(id),
            WasapiError::AccessDenied => AudioError::PermissionDenied,
            other => AudioError::HardwareFailure(other.to_string()),
        }
    }
}

/// Attach the failing COM call's name to a `windows::core::Result`.
pub(crate) trait Context<T> {
    fn context(self, call: &'static str) -> Result<T, WasapiError>;
}

impl<T> Context<T> for windows::core::Result<T> {
    fn context(self, call: &'static str) -> Result<T, WasapiError> {
        self.map_err(|source| WasapiError::Call { call, source })
    }
}
