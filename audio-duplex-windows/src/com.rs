//! Per-thread COM apartment management.
//!
//! Backend calls arrive on core-owned threads that have never touched COM,
//! so every entry point joins the multithreaded apartment on first use. The
//! guard lives in a thread-local and uninitializes at thread exit.

use std::cell::RefCell;

use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

struct ComGuard;

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

thread_local! {
    static COM_INIT: RefCell<Option<ComGuard>> = const { RefCell::new(None) };
}

/// Join the MTA on this thread if it has not already.
///
/// A failure (e.g. the thread is already an STA) is tolerated: COM is still
/// usable for the calls this crate makes.
pub(crate) fn ensure_mta() {
    COM_INIT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
            if hr.is_ok() {
                *slot = Some(ComGuard);
            }
        }
    });
}
