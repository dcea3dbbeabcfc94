//! # audio-duplex-windows
//!
//! Windows WASAPI device backend for audio-duplex-kit.
//!
//! Provides:
//! - `WasapiBackend` — `DeviceBackend` implementation over WASAPI shared mode
//! - `DeviceEnumerator` — endpoint enumeration via the MMDevice API
//! - `permissions` — Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063) for event-driven shared-mode streams
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_duplex_core::{CapturePipeline, DuplexConfig, NullObserver};
//! use audio_duplex_windows::WasapiBackend;
//!
//! let backend = Arc::new(WasapiBackend::new());
//! let capture = CapturePipeline::new(backend, &DuplexConfig::default(), Arc::new(NullObserver))?;
//! capture.start()?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_backend;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_backend::WasapiBackend;
