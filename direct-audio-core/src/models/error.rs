use thiserror::Error;

/// Errors that can occur while opening or driving a direct audio line.
///
/// Underruns and overruns are not errors: they are absorbed by the ring
/// buffer (silence on playback, oldest-data loss on capture) and only show up
/// in position queries and diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("format not supported: {0}")]
    FormatNotSupported(String),

    #[error("hardware failure: {0}")]
    HardwareFailure(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("operation requires a {0} line")]
    WrongDirection(&'static str),

    #[error("no open line with handle {0}")]
    InvalidHandle(u64),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),
}

impl AudioError {
    /// Whether the error originates from the device or host layer rather
    /// than from misuse of the API.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotAvailable(_) | Self::HardwareFailure(_) | Self::PermissionDenied
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_distinguished_from_misuse() {
        assert!(AudioError::DeviceNotAvailable("usb".into()).is_device_error());
        assert!(AudioError::HardwareFailure("stalled".into()).is_device_error());
        assert!(AudioError::PermissionDenied.is_device_error());

        assert!(!AudioError::InvalidHandle(3).is_device_error());
        assert!(!AudioError::WrongDirection("source").is_device_error());
        assert!(!AudioError::InvalidState("closed".into()).is_device_error());
    }

    #[test]
    fn messages_name_the_problem() {
        assert_eq!(
            AudioError::WrongDirection("target").to_string(),
            "operation requires a target line"
        );
        assert_eq!(AudioError::InvalidHandle(7).to_string(), "no open line with handle 7");
    }
}
