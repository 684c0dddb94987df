//! Windows audio endpoint enumeration via the MMDevice API.
//!
//! Every active endpoint becomes one device with a single stream in its data
//! flow: render endpoints carry source lines, capture endpoints target lines.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use direct_audio_core::models::audio_models::{DeviceDescriptor, Direction};

use crate::error::{Context, WasapiError};

/// Endpoint enumerator using the Windows MMDevice API.
///
/// Requires COM to be initialized on the calling thread.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> std::result::Result<Self, WasapiError> {
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }.context("CoCreateInstance")?;
        Ok(Self { enumerator })
    }

    /// Active render endpoints followed by active capture endpoints.
    pub fn list_devices(&self) -> std::result::Result<Vec<DeviceDescriptor>, WasapiError> {
        let mut devices = self.list_flow(eRender)?;
        devices.extend(self.list_flow(eCapture)?);
        Ok(devices)
    }

    /// Look an endpoint up by its MMDevice id.
    pub fn device(&self, id: &str) -> std::result::Result<IMMDevice, WasapiError> {
        let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe { self.enumerator.GetDevice(PCWSTR(wide_id.as_ptr())) }
            .map_err(|_| WasapiError::EndpointNotFound(id.to_string()))
    }

    /// The default endpoint lines in `direction` would use.
    pub fn default_device(&self, direction: Direction) -> std::result::Result<IMMDevice, WasapiError> {
        unsafe { self.enumerator.GetDefaultAudioEndpoint(data_flow(direction), eConsole) }
            .map_err(|_| WasapiError::EndpointNotFound(format!("default {} endpoint", direction.label())))
    }

    fn list_flow(&self, flow: EDataFlow) -> std::result::Result<Vec<DeviceDescriptor>, WasapiError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
                .context("EnumAudioEndpoints")?;
            let count = collection.GetCount().context("GetCount")?;

            let is_render = flow == eRender;
            let mut devices = Vec::new();

            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                let id = match device.GetId() {
                    Ok(id) => id.to_string().unwrap_or_default(),
                    Err(_) => continue,
                };

                let store = device.OpenPropertyStore(STGM_READ).ok();
                let read = |key: &PROPERTYKEY| store.as_ref().and_then(|s| string_property(s, key));

                let name = read(&PKEY_Device_FriendlyName).unwrap_or_else(|| format!("Endpoint {}", i));
                let vendor = read(&PKEY_DeviceInterface_FriendlyName).unwrap_or_else(|| "Unknown".into());
                let transport = transport_label(read(&PKEY_Device_EnumeratorName).as_deref());
                let channel_count = mix_channels(&device).unwrap_or(2);

                devices.push(DeviceDescriptor {
                    id,
                    name,
                    vendor,
                    description: format!(
                        "{} {} endpoint",
                        transport,
                        if is_render { "playback" } else { "capture" }
                    ),
                    input_stream_count: u32::from(!is_render),
                    output_stream_count: u32::from(is_render),
                    channel_count,
                });
            }

            Ok(devices)
        }
    }
}

pub(crate) fn data_flow(direction: Direction) -> EDataFlow {
    match direction {
        Direction::Source => eRender,
        Direction::Target => eCapture,
    }
}

/// Channel count of the endpoint's shared-mode mix format.
fn mix_channels(device: &IMMDevice) -> Option<u16> {
    unsafe {
        let client: IAudioClient = device.Activate(CLSCTX_ALL, None).ok()?;
        let format = client.GetMixFormat().ok()?;
        let channels = (*format).nChannels;
        CoTaskMemFree(Some(format as *const _));
        Some(channels)
    }
}

fn transport_label(enumerator_name: Option<&str>) -> &'static str {
    match enumerator_name {
        Some(name) if name.contains("BTHLEENUM") => "Bluetooth LE",
        Some(name) if name.contains("BTHENUM") => "Bluetooth",
        Some(name) if name.contains("USB") => "USB",
        _ => "Built-in",
    }
}

/// Read a string-valued property, clearing the PROPVARIANT afterwards.
fn string_property(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<String> {
    unsafe {
        let mut prop = store.GetValue(key).ok()?;

        let value = if prop.Anonymous.Anonymous.vt == VT_LPWSTR {
            let pwsz = prop.Anonymous.Anonymous.Anonymous.pwszVal;
            if pwsz.is_null() {
                None
            } else {
                let len = (0..).take_while(|&i| *pwsz.0.offset(i) != 0).count();
                Some(String::from_utf16_lossy(std::slice::from_raw_parts(pwsz.0, len)))
            }
        } else {
            None
        };

        PropVariantClear(&mut prop).ok();
        value
    }
}
