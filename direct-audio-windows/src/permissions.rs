//! Windows microphone privacy check.
//!
//! On Windows 10 1803+, microphone access is controlled by the privacy
//! settings at Settings > Privacy > Microphone. Unpackaged desktop apps get
//! no consent dialog: when the toggle is off, activating a capture client
//! simply fails with `E_ACCESSDENIED`.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use direct_audio_core::models::audio_models::Direction;
use direct_audio_core::models::error::AudioError;

use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WasapiError;

/// Check whether capture from the default microphone is allowed.
///
/// Returns `Ok(false)` when there is no capture endpoint at all.
pub fn check_microphone_permission() -> Result<bool, AudioError> {
    let _com = ComScope::enter()?;
    let enumerator = DeviceEnumerator::new()?;
    let device = match enumerator.default_device(Direction::Target) {
        Ok(d) => d,
        Err(_) => return Ok(false),
    };
    Ok(capture_access_allowed(&device))
}

/// Try activating a client on `device`; only an access-denied failure counts
/// as a missing permission.
pub(crate) fn capture_access_allowed(device: &IMMDevice) -> bool {
    let result: windows::core::Result<IAudioClient> = unsafe { device.Activate(CLSCTX_ALL, None) };
    match result {
        Ok(_) => true,
        Err(e) if e.code() == E_ACCESSDENIED => false,
        Err(e) => {
            // Not a privacy problem; opening the stream reports it properly.
            log::warn!("unexpected error checking microphone access: {}", e);
            true
        }
    }
}

/// Fail with `AccessDenied` when capture on `device` is blocked.
pub(crate) fn require_capture_access(device: &IMMDevice) -> Result<(), WasapiError> {
    if capture_access_allowed(device) {
        Ok(())
    } else {
        Err(WasapiError::AccessDenied)
    }
}
