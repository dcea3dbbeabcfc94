//! Trait boundary to the platform audio stack.
//!
//! The device-session state machine is the only caller of these traits. A
//! backend exposes endpoint enumeration, asynchronous interface activation,
//! and the per-stream client calls; everything crosses this boundary as
//! plain byte spans so platform buffer pointers never leak into the core.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::error::AudioError;
use crate::models::format::SampleFormat;

/// Which way audio flows through a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Capture,
    Render,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Render => "render",
        }
    }
}

/// One audio endpoint as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Result of reading one device packet: frame count plus the backend's
/// silence flag (silent packets still carry their full byte length, zeroed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedPacket {
    pub frames: u32,
    pub silent: bool,
}

/// Completion callback for asynchronous interface activation.
pub type ActivationHandler =
    Box<dyn FnOnce(Result<Box<dyn DeviceClient>, AudioError>) + Send + 'static>;

/// Entry point to a platform audio stack.
pub trait DeviceBackend: Send + Sync {
    /// Enumerate endpoints for one direction.
    fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointDescriptor>, AudioError>;

    /// Id of the default endpoint, if the platform has one configured.
    fn default_endpoint_id(&self, direction: Direction) -> Option<String>;

    /// Begin asynchronous activation of an endpoint's audio interface.
    ///
    /// `on_complete` runs exactly once, from a backend-owned thread, with the
    /// activated client or the activation failure. The caller must be ready
    /// for the completion to race its own `stop()`.
    fn activate(&self, endpoint_id: &str, direction: Direction, on_complete: ActivationHandler);
}

/// An activated, format-negotiable audio client for a single stream.
///
/// Call order: `mix_format` → `initialize` → (`buffer_frame_count`,
/// `register_ready_signal`, service accessor) → `start` → ... → `stop` →
/// `reset`.
pub trait DeviceClient: Send {
    /// The device's native mix format. Available before `initialize`.
    fn mix_format(&self) -> Result<SampleFormat, AudioError>;

    /// Initialize the stream with the negotiated format and buffer duration.
    fn initialize(
        &mut self,
        format: &SampleFormat,
        buffer_duration: Duration,
    ) -> Result<(), AudioError>;

    /// Hardware buffer capacity in frames. Valid after `initialize`.
    fn buffer_frame_count(&self) -> Result<u32, AudioError>;

    /// Frames queued in the hardware buffer and not yet played. Render only.
    fn current_padding(&self) -> Result<u32, AudioError>;

    /// Effective stream latency reported by the device.
    fn stream_latency(&self) -> Result<Duration, AudioError>;

    /// Register the signal the backend raises whenever the device buffer is
    /// ready for another exchange.
    fn register_ready_signal(&mut self, signal: Arc<BufferReadySignal>) -> Result<(), AudioError>;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self) -> Result<(), AudioError>;

    fn reset(&mut self) -> Result<(), AudioError>;

    /// Capture-side service. Errors for render streams.
    fn capture_client(&mut self) -> Result<Box<dyn CaptureClient>, AudioError>;

    /// Render-side service. Errors for capture streams.
    fn render_client(&mut self) -> Result<Box<dyn RenderClient>, AudioError>;
}

/// Packet-granular reader for a capture stream.
pub trait CaptureClient: Send {
    /// Frames in the next device packet, 0 when none is pending.
    fn next_packet_frames(&mut self) -> Result<u32, AudioError>;

    /// Copy the next packet's bytes into `into` (replacing its contents)
    /// and release the device buffer.
    fn read_packet(&mut self, into: &mut Vec<u8>) -> Result<CapturedPacket, AudioError>;
}

/// Frame-granular writer for a render stream.
pub trait RenderClient: Send {
    /// Submit `frames` interleaved frames (`bytes` holds exactly that much
    /// data in the negotiated format).
    fn submit(&mut self, frames: u32, bytes: &[u8]) -> Result<(), AudioError>;
}

/// Buffer-ready notification shared between a backend and the session loops.
///
/// A mutex/condvar pair standing in for the platform event handle: the
/// backend raises it, a session loop consumes it with a bounded wait.
pub struct BufferReadySignal {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl BufferReadySignal {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Raise the signal, waking one waiter.
    pub fn notify(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        self.cv.notify_one();
    }

    /// Wait until the signal is raised or `timeout` elapses, consuming the
    /// raised state. Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock();
        if !*ready {
            self.cv.wait_for(&mut ready, timeout);
        }
        let fired = *ready;
        *ready = false;
        fired
    }
}

impl Default for BufferReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_wakes_waiter() {
        let signal = Arc::new(BufferReadySignal::new());
        let waiter = Arc::clone(&signal);

        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        signal.notify();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn signal_times_out_when_unraised() {
        let signal = BufferReadySignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn notify_before_wait_is_not_lost() {
        let signal = BufferReadySignal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        // Consumed: the next wait times out.
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }
}
