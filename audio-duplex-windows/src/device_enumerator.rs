//! Windows audio endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list capture and render endpoints with
//! friendly names, fetch the default endpoint id, and search by name
//! fragment for the no-default fallback path.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;

use audio_duplex_core::device::backend::{Direction, EndpointDescriptor};
use audio_duplex_core::models::error::AudioError;

use crate::com;

/// Audio endpoint enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

fn data_flow(direction: Direction) -> EDataFlow {
    match direction {
        Direction::Capture => eCapture,
        Direction::Render => eRender,
    }
}

impl DeviceEnumerator {
    pub fn new() -> Result<Self, AudioError> {
        com::ensure_mta();
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| {
                    AudioError::backend("CoCreateInstance", format!("{}", e))
                })?;
            Ok(Self { enumerator })
        }
    }

    /// List active endpoints for one direction.
    pub fn list(&self, direction: Direction) -> Result<Vec<EndpointDescriptor>, AudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow(direction), DEVICE_STATE_ACTIVE)
                .map_err(|e| AudioError::backend("EnumAudioEndpoints", format!("{}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| AudioError::backend("GetCount", format!("{}", e)))?;

            let default_id = self.default_id(direction);
            let mut endpoints = Vec::new();

            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(_) => continue,
                };

                let id = match device.GetId() {
                    Ok(id) => id.to_string().unwrap_or_default(),
                    Err(_) => continue,
                };

                let name =
                    Self::friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                let is_default = default_id.as_deref() == Some(&id);

                endpoints.push(EndpointDescriptor {
                    id,
                    name,
                    is_default,
                });
            }

            Ok(endpoints)
        }
    }

    /// Id of the default endpoint, or None when the platform has no default
    /// configured (headless systems, disconnected docks).
    pub fn default_id(&self, direction: Direction) -> Option<String> {
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow(direction), eConsole)
                .ok()?;
            device.GetId().ok().and_then(|id| id.to_string().ok())
        }
    }

    /// First endpoint whose friendly name contains `fragment`.
    pub fn find_by_name_fragment(
        &self,
        direction: Direction,
        fragment: &str,
    ) -> Result<Option<EndpointDescriptor>, AudioError> {
        let endpoints = self.list(direction)?;
        Ok(endpoints.into_iter().find(|e| e.name.contains(fragment)))
    }

    /// Resolve an endpoint id to an `IMMDevice`.
    pub(crate) fn device_by_id(&self, id: &str) -> Result<IMMDevice, AudioError> {
        unsafe {
            let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
            self.enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|_| AudioError::DeviceNotAvailable)
        }
    }

    /// Read the PKEY_Device_FriendlyName property from a device.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;

            let mut prop_variant = std::mem::zeroed::<PROPVARIANT>();
            store
                .GetValue(&PKEY_Device_FriendlyName, &mut prop_variant)
                .ok()?;

            let name = if prop_variant.Anonymous.Anonymous.vt == VT_LPWSTR {
                let pwsz = prop_variant.Anonymous.Anonymous.Anonymous.pwszVal;
                if !pwsz.is_null() {
                    let len = (0..).take_while(|&i| *pwsz.offset(i) != 0).count();
                    Some(String::from_utf16_lossy(std::slice::from_raw_parts(
                        pwsz, len,
                    )))
                } else {
                    None
                }
            } else {
                None
            };

            PropVariantClear(&mut prop_variant).ok();
            name
        }
    }
}
