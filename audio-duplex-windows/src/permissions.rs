//! Windows microphone privacy permission check.
//!
//! On Windows 10 1803+, microphone access is controlled by the privacy
//! settings at Settings > Privacy > Microphone. Desktop apps are generally
//! allowed unless the user has disabled the global toggle; packaged apps
//! (MSIX/UWP) get an automatic consent prompt.

use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_duplex_core::models::error::AudioError;

use crate::com;

/// Check if microphone access is available.
///
/// Attempts to open the default capture device. A failure with
/// `E_ACCESSDENIED` or `AUDCLNT_E_DEVICE_IN_USE` means microphone access is
/// likely disabled in the Windows privacy settings.
pub fn check_microphone_permission() -> Result<bool, AudioError> {
    com::ensure_mta();
    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| AudioError::backend("CoCreateInstance", format!("{}", e)))?;

        let device = match enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) {
            Ok(d) => d,
            Err(_) => return Ok(false), // No capture device
        };

        let result: windows::core::Result<IAudioClient> = device.Activate(CLSCTX_ALL, None);
        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let code = e.code();
                // E_ACCESSDENIED or AUDCLNT_E_DEVICE_IN_USE
                if code.0 == -2147024891i32 || code.0 == -2004287478i32 {
                    Ok(false)
                } else {
                    log::warn!("Unexpected error checking mic permission: {}", e);
                    Ok(true)
                }
            }
        }
    }
}

/// Render endpoints need no privacy consent on Windows.
pub fn check_render_permission() -> bool {
    true
}
