//! WASAPI implementation of the core's device backend boundary.
//!
//! Activation runs on a dedicated thread and completes through the core's
//! callback; everything else is a thin shared-mode wrapper around
//! `IAudioClient` and its capture/render services. Device buffer pointers
//! never leave this module — packets are copied into caller-owned byte
//! vectors before `ReleaseBuffer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use windows::core::*;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use audio_duplex_core::device::backend::{
    ActivationHandler, BufferReadySignal, CaptureClient, CapturedPacket, DeviceBackend,
    DeviceClient, Direction, EndpointDescriptor, RenderClient,
};
use audio_duplex_core::models::error::AudioError;
use audio_duplex_core::models::format::SampleFormat;

use crate::com;
use crate::device_enumerator::DeviceEnumerator;

/// 100-nanosecond units per second, the REFERENCE_TIME base.
const REFTIMES_PER_SEC: u64 = 10_000_000;

/// WASAPI device backend. Stateless; each activation produces an
/// independent client.
pub struct WasapiBackend;

impl WasapiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WasapiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for WasapiBackend {
    fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointDescriptor>, AudioError> {
        DeviceEnumerator::new()?.list(direction)
    }

    fn default_endpoint_id(&self, direction: Direction) -> Option<String> {
        DeviceEnumerator::new().ok()?.default_id(direction)
    }

    fn activate(&self, endpoint_id: &str, direction: Direction, on_complete: ActivationHandler) {
        let endpoint_id = endpoint_id.to_string();
        let spawned = thread::Builder::new()
            .name("wasapi-activation".into())
            .spawn(move || {
                on_complete(activate_client(&endpoint_id, direction));
            });
        if let Err(e) = spawned {
            log::error!("failed to spawn activation thread: {}", e);
        }
    }
}

fn activate_client(
    endpoint_id: &str,
    direction: Direction,
) -> Result<Box<dyn DeviceClient>, AudioError> {
    com::ensure_mta();
    unsafe {
        let enumerator = DeviceEnumerator::new()?;
        let device = enumerator.device_by_id(endpoint_id)?;

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| AudioError::ActivationFailed(format!("Activate failed: {}", e)))?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| AudioError::ActivationFailed(format!("GetMixFormat failed: {}", e)))?;

        Ok(Box::new(WasapiDeviceClient {
            direction,
            audio_client,
            mix_format_ptr,
            block_align: (*mix_format_ptr).nBlockAlign as u32,
            event: None,
            waiter_stop: Arc::new(AtomicBool::new(true)),
            waiter: None,
        }))
    }
}

/// One activated shared-mode WASAPI stream.
struct WasapiDeviceClient {
    direction: Direction,
    audio_client: IAudioClient,
    mix_format_ptr: *mut WAVEFORMATEX,
    block_align: u32,
    event: Option<HANDLE>,
    waiter_stop: Arc<AtomicBool>,
    waiter: Option<JoinHandle<()>>,
}

// SAFETY: the COM interfaces are activated in the MTA and every thread that
// calls into them joins the MTA first (com::ensure_mta). The raw format
// pointer is owned by this struct and freed exactly once on drop.
unsafe impl Send for WasapiDeviceClient {}

/// Raw event handle that may cross into the waiter thread.
struct EventHandle(HANDLE);
// SAFETY: Win32 event handles are process-global tokens; any thread may
// wait on one.
unsafe impl Send for EventHandle {}

impl DeviceClient for WasapiDeviceClient {
    fn mix_format(&self) -> Result<SampleFormat, AudioError> {
        unsafe {
            let format = &*self.mix_format_ptr;
            // The shared-mode engine mixes in 32-bit IEEE float; both the
            // plain float tag and the extensible wrapper report it that way.
            let is_float = format.wBitsPerSample == 32;
            Ok(SampleFormat {
                sample_rate_hz: format.nSamplesPerSec,
                channels: format.nChannels,
                bits_per_sample: format.wBitsPerSample,
                is_float,
            })
        }
    }

    fn initialize(
        &mut self,
        format: &SampleFormat,
        buffer_duration: Duration,
    ) -> Result<(), AudioError> {
        com::ensure_mta();
        let mix = self.mix_format()?;
        if *format != mix {
            return Err(AudioError::FormatRejected(
                "shared-mode streams run at the device mix format".into(),
            ));
        }

        let duration_reftimes =
            (buffer_duration.as_secs_f64() * REFTIMES_PER_SEC as f64) as i64;

        unsafe {
            self.audio_client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
                    duration_reftimes,
                    0,
                    self.mix_format_ptr,
                    None,
                )
                .map_err(|e| {
                    AudioError::ActivationFailed(format!("IAudioClient::Initialize failed: {}", e))
                })?;
        }
        Ok(())
    }

    fn buffer_frame_count(&self) -> Result<u32, AudioError> {
        unsafe {
            self.audio_client
                .GetBufferSize()
                .map_err(|e| AudioError::backend("GetBufferSize", format!("{}", e)))
        }
    }

    fn current_padding(&self) -> Result<u32, AudioError> {
        unsafe {
            self.audio_client
                .GetCurrentPadding()
                .map_err(|e| AudioError::backend("GetCurrentPadding", format!("{}", e)))
        }
    }

    fn stream_latency(&self) -> Result<Duration, AudioError> {
        unsafe {
            let reftimes = self
                .audio_client
                .GetStreamLatency()
                .map_err(|e| AudioError::backend("GetStreamLatency", format!("{}", e)))?;
            Ok(Duration::from_nanos(reftimes.max(0) as u64 * 100))
        }
    }

    fn register_ready_signal(&mut self, signal: Arc<BufferReadySignal>) -> Result<(), AudioError> {
        unsafe {
            let event = CreateEventW(None, false, false, None)
                .map_err(|e| AudioError::backend("CreateEvent", format!("{}", e)))?;
            self.audio_client.SetEventHandle(event).map_err(|e| {
                let _ = CloseHandle(event);
                AudioError::backend("SetEventHandle", format!("{}", e))
            })?;
            self.event = Some(event);

            // Bridge the Win32 event to the core's condvar signal.
            self.waiter_stop.store(false, Ordering::SeqCst);
            let stop = Arc::clone(&self.waiter_stop);
            let handle = EventHandle(event);
            let waiter = thread::Builder::new()
                .name("wasapi-event-waiter".into())
                .spawn(move || {
                    let handle = handle;
                    while !stop.load(Ordering::SeqCst) {
                        let waited = WaitForSingleObjectEx(handle.0, 200, true);
                        if waited == WAIT_OBJECT_0 {
                            signal.notify();
                        }
                    }
                })
                .map_err(|e| AudioError::backend("CreateThread", format!("{}", e)))?;
            self.waiter = Some(waiter);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        com::ensure_mta();
        unsafe {
            self.audio_client
                .Start()
                .map_err(|e| AudioError::ActivationFailed(format!("IAudioClient::Start failed: {}", e)))
        }
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        com::ensure_mta();
        unsafe {
            self.audio_client
                .Stop()
                .map_err(|e| AudioError::backend("Stop", format!("{}", e)))
        }
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        com::ensure_mta();
        unsafe {
            self.audio_client
                .Reset()
                .map_err(|e| AudioError::backend("Reset", format!("{}", e)))
        }
    }

    fn capture_client(&mut self) -> Result<Box<dyn CaptureClient>, AudioError> {
        if !matches!(self.direction, Direction::Capture) {
            return Err(AudioError::backend(
                "GetService",
                "capture service on a render stream",
            ));
        }
        com::ensure_mta();
        unsafe {
            let service: IAudioCaptureClient = self
                .audio_client
                .GetService()
                .map_err(|e| AudioError::ActivationFailed(format!("GetService failed: {}", e)))?;

            // Keep the exchange thread off the scheduler's beaten path.
            let mut task_index: u32 = 0;
            let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
            let _mmcss_handle =
                AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

            Ok(Box::new(WasapiCaptureClient {
                service,
                block_align: self.block_align,
            }))
        }
    }

    fn render_client(&mut self) -> Result<Box<dyn RenderClient>, AudioError> {
        if !matches!(self.direction, Direction::Render) {
            return Err(AudioError::backend(
                "GetService",
                "render service on a capture stream",
            ));
        }
        com::ensure_mta();
        unsafe {
            let service: IAudioRenderClient = self
                .audio_client
                .GetService()
                .map_err(|e| AudioError::ActivationFailed(format!("GetService failed: {}", e)))?;

            let mut task_index: u32 = 0;
            let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
            let _mmcss_handle =
                AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

            Ok(Box::new(WasapiRenderClient {
                service,
                block_align: self.block_align,
            }))
        }
    }
}

impl Drop for WasapiDeviceClient {
    fn drop(&mut self) {
        self.waiter_stop.store(true, Ordering::SeqCst);
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.join();
        }
        unsafe {
            if let Some(event) = self.event.take() {
                let _ = CloseHandle(event);
            }
            CoTaskMemFree(Some(self.mix_format_ptr as *const _ as *const _));
        }
    }
}

/// Packet-granular wrapper over `IAudioCaptureClient`.
struct WasapiCaptureClient {
    service: IAudioCaptureClient,
    block_align: u32,
}

// SAFETY: used from a single MTA session-loop thread.
unsafe impl Send for WasapiCaptureClient {}

impl CaptureClient for WasapiCaptureClient {
    fn next_packet_frames(&mut self) -> Result<u32, AudioError> {
        unsafe {
            self.service
                .GetNextPacketSize()
                .map_err(|e| AudioError::backend("GetNextPacketSize", format!("{}", e)))
        }
    }

    fn read_packet(&mut self, into: &mut Vec<u8>) -> Result<CapturedPacket, AudioError> {
        unsafe {
            let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;

            self.service
                .GetBuffer(&mut buffer_ptr, &mut frames, &mut flags, None, None)
                .map_err(|e| AudioError::backend("GetBuffer", format!("{}", e)))?;

            let byte_count = frames as usize * self.block_align as usize;
            let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;

            into.clear();
            if silent || buffer_ptr.is_null() {
                into.resize(byte_count, 0);
            } else {
                into.extend_from_slice(std::slice::from_raw_parts(buffer_ptr, byte_count));
            }

            self.service
                .ReleaseBuffer(frames)
                .map_err(|e| AudioError::backend("ReleaseBuffer", format!("{}", e)))?;

            Ok(CapturedPacket { frames, silent })
        }
    }
}

/// Frame-granular wrapper over `IAudioRenderClient`.
struct WasapiRenderClient {
    service: IAudioRenderClient,
    block_align: u32,
}

// SAFETY: used from a single MTA session-loop thread.
unsafe impl Send for WasapiRenderClient {}

impl RenderClient for WasapiRenderClient {
    fn submit(&mut self, frames: u32, bytes: &[u8]) -> Result<(), AudioError> {
        debug_assert_eq!(bytes.len(), frames as usize * self.block_align as usize);
        unsafe {
            let device_buffer = self
                .service
                .GetBuffer(frames)
                .map_err(|e| AudioError::backend("GetBuffer", format!("{}", e)))?;

            std::ptr::copy_nonoverlapping(bytes.as_ptr(), device_buffer, bytes.len());

            self.service
                .ReleaseBuffer(frames, 0)
                .map_err(|e| AudioError::backend("ReleaseBuffer", format!("{}", e)))
        }
    }
}
