//! In-process device backend for tests.
//!
//! Deterministic stand-in for a platform audio stack: capture packets are
//! scripted by the test, rendered bytes are recorded for inspection, and
//! activation runs on a real thread with a configurable delay so start/stop
//! races can be exercised for real.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::{
    ActivationHandler, BufferReadySignal, CaptureClient, CapturedPacket, DeviceBackend,
    DeviceClient, Direction, EndpointDescriptor, RenderClient,
};
use crate::models::error::AudioError;
use crate::models::format::SampleFormat;

struct MockFrame {
    bytes: Vec<u8>,
    silent: bool,
}

struct MockShared {
    capture_format: SampleFormat,
    render_format: SampleFormat,
    buffer_frames: u32,
    activation_delay: Duration,
    has_default: Mutex<bool>,
    fail_next_activation: Mutex<Option<AudioError>>,
    capture_queue: Mutex<VecDeque<MockFrame>>,
    rendered: Mutex<Vec<u8>>,
    padding: AtomicU32,
    ready: Mutex<Option<Arc<BufferReadySignal>>>,
    activations: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    resets: AtomicU32,
}

/// Scriptable [`DeviceBackend`] implementation.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<MockShared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                capture_format: SampleFormat::ieee_float(48_000, 1),
                render_format: SampleFormat::ieee_float(48_000, 2),
                buffer_frames: 4800, // 100 ms at 48 kHz
                activation_delay: Duration::ZERO,
                has_default: Mutex::new(true),
                fail_next_activation: Mutex::new(None),
                capture_queue: Mutex::new(VecDeque::new()),
                rendered: Mutex::new(Vec::new()),
                padding: AtomicU32::new(0),
                ready: Mutex::new(None),
                activations: AtomicU32::new(0),
                starts: AtomicU32::new(0),
                stops: AtomicU32::new(0),
                resets: AtomicU32::new(0),
            }),
        }
    }

    /// Device mix format reported on the capture side (defaults to mono).
    pub fn with_capture_format(mut self, format: SampleFormat) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("configure before sharing")
            .capture_format = format;
        self
    }

    /// Delay between `activate()` and its completion callback.
    pub fn with_activation_delay(mut self, delay: Duration) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("configure before sharing")
            .activation_delay = delay;
        self
    }

    /// Make the next activation fail with `error`.
    pub fn fail_next_activation(&self, error: AudioError) {
        *self.shared.fail_next_activation.lock() = Some(error);
    }

    /// Drop the default endpoint so discovery has to fall back to the
    /// endpoint list.
    pub fn remove_default_endpoint(&self) {
        *self.shared.has_default.lock() = false;
    }

    /// Queue one capture packet and raise the buffer-ready signal.
    pub fn push_capture_packet(&self, bytes: Vec<u8>, silent: bool) {
        self.shared
            .capture_queue
            .lock()
            .push_back(MockFrame { bytes, silent });
        if let Some(signal) = self.shared.ready.lock().as_ref() {
            signal.notify();
        }
    }

    /// Everything submitted through the render client so far.
    pub fn rendered_bytes(&self) -> Vec<u8> {
        self.shared.rendered.lock().clone()
    }

    pub fn set_padding(&self, frames: u32) {
        self.shared.padding.store(frames, Ordering::SeqCst);
    }

    pub fn activation_count(&self) -> u32 {
        self.shared.activations.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> u32 {
        self.shared.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.shared.stops.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> u32 {
        self.shared.resets.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for MockBackend {
    fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointDescriptor>, AudioError> {
        let is_default = *self.shared.has_default.lock();
        Ok(vec![EndpointDescriptor {
            id: format!("mock-{}", direction.as_str()),
            name: format!("Mock {} Array", direction.as_str()),
            is_default,
        }])
    }

    fn default_endpoint_id(&self, direction: Direction) -> Option<String> {
        if *self.shared.has_default.lock() {
            Some(format!("mock-{}", direction.as_str()))
        } else {
            None
        }
    }

    fn activate(&self, endpoint_id: &str, direction: Direction, on_complete: ActivationHandler) {
        let shared = Arc::clone(&self.shared);
        let endpoint_id = endpoint_id.to_string();
        thread::Builder::new()
            .name("mock-activation".into())
            .spawn(move || {
                if !shared.activation_delay.is_zero() {
                    thread::sleep(shared.activation_delay);
                }
                shared.activations.fetch_add(1, Ordering::SeqCst);

                if let Some(error) = shared.fail_next_activation.lock().take() {
                    on_complete(Err(error));
                    return;
                }
                if !endpoint_id.starts_with("mock-") {
                    on_complete(Err(AudioError::DeviceNotAvailable));
                    return;
                }

                on_complete(Ok(Box::new(MockDeviceClient {
                    shared,
                    direction,
                    format: None,
                })));
            })
            .expect("failed to spawn mock activation thread");
    }
}

struct MockDeviceClient {
    shared: Arc<MockShared>,
    direction: Direction,
    format: Option<SampleFormat>,
}

impl DeviceClient for MockDeviceClient {
    fn mix_format(&self) -> Result<SampleFormat, AudioError> {
        Ok(match self.direction {
            Direction::Capture => self.shared.capture_format,
            Direction::Render => self.shared.render_format,
        })
    }

    fn initialize(
        &mut self,
        format: &SampleFormat,
        _buffer_duration: Duration,
    ) -> Result<(), AudioError> {
        self.format = Some(*format);
        Ok(())
    }

    fn buffer_frame_count(&self) -> Result<u32, AudioError> {
        Ok(self.shared.buffer_frames)
    }

    fn current_padding(&self) -> Result<u32, AudioError> {
        Ok(self.shared.padding.load(Ordering::SeqCst))
    }

    fn stream_latency(&self) -> Result<Duration, AudioError> {
        Ok(Duration::from_millis(10))
    }

    fn register_ready_signal(&mut self, signal: Arc<BufferReadySignal>) -> Result<(), AudioError> {
        *self.shared.ready.lock() = Some(signal);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        self.shared.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capture_client(&mut self) -> Result<Box<dyn CaptureClient>, AudioError> {
        let negotiated = self.format.unwrap_or(self.shared.capture_format);
        match self.direction {
            Direction::Capture => Ok(Box::new(MockCaptureClient {
                shared: Arc::clone(&self.shared),
                block_align: negotiated.block_align(),
            })),
            Direction::Render => Err(AudioError::backend(
                "GetService",
                "capture service on a render stream",
            )),
        }
    }

    fn render_client(&mut self) -> Result<Box<dyn RenderClient>, AudioError> {
        match self.direction {
            Direction::Render => Ok(Box::new(MockRenderClient {
                shared: Arc::clone(&self.shared),
            })),
            Direction::Capture => Err(AudioError::backend(
                "GetService",
                "render service on a capture stream",
            )),
        }
    }
}

struct MockCaptureClient {
    shared: Arc<MockShared>,
    block_align: u32,
}

impl CaptureClient for MockCaptureClient {
    fn next_packet_frames(&mut self) -> Result<u32, AudioError> {
        let queue = self.shared.capture_queue.lock();
        Ok(queue
            .front()
            .map(|frame| frame.bytes.len() as u32 / self.block_align)
            .unwrap_or(0))
    }

    fn read_packet(&mut self, into: &mut Vec<u8>) -> Result<CapturedPacket, AudioError> {
        let frame = self
            .shared
            .capture_queue
            .lock()
            .pop_front()
            .ok_or_else(|| AudioError::backend("GetBuffer", "no packet pending"))?;
        into.clear();
        into.extend_from_slice(&frame.bytes);
        Ok(CapturedPacket {
            frames: frame.bytes.len() as u32 / self.block_align,
            silent: frame.silent,
        })
    }
}

struct MockRenderClient {
    shared: Arc<MockShared>,
}

impl RenderClient for MockRenderClient {
    fn submit(&mut self, frames: u32, bytes: &[u8]) -> Result<(), AudioError> {
        debug_assert_eq!(bytes.len() as u32 % frames.max(1), 0);
        self.shared.rendered.lock().extend_from_slice(bytes);
        Ok(())
    }
}
