use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::error::{Context, WasapiError};

/// COM initialisation for the current thread, undone on drop.
///
/// A thread the application already put in an STA keeps its apartment;
/// MMDevice objects work from either.
pub(crate) struct ComScope {
    owned: bool,
}

impl ComScope {
    pub fn enter() -> Result<Self, WasapiError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok().context("CoInitializeEx")?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}
