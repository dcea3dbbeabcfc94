use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::backend::{DeviceBackend, Direction};
use crate::models::config::{DownmixPlan, DuplexConfig};
use crate::models::error::AudioError;
use crate::models::format::SampleFormat;
use crate::models::state::SessionState;
use crate::pipeline::CapturePhase;
use crate::processing::meter::LevelMeter;
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::sample_convert;
use crate::processing::AtomicF32;
use crate::session::device_session::{
    CaptureHandler, DeviceSession, SessionIo, SessionOptions,
};
use crate::session::observer::SessionObserver;
use crate::storage::wav_dump::WavDump;
use crate::transport::{Packet, PacketSink};

/// Microphone-side pipeline: device capture callback → ring buffer →
/// bounded packets for the transport.
///
/// The device thread only downmixes, applies gain, and writes the ring; the
/// drain runs on whatever cadence the owner chooses and carries all the
/// observable side effects (packets, metering, optional WAV dump).
pub struct CapturePipeline {
    inner: Arc<CaptureInner>,
    session: DeviceSession,
}

struct CaptureInner {
    downmix: DownmixPlan,
    max_packet_bytes: usize,
    sample_rate_hz: u32,
    dump_dir: Option<std::path::PathBuf>,
    ring: RingBuffer,
    gain: AtomicF32,
    meter: LevelMeter,
    phase: Mutex<CapturePhase>,
    observer: Arc<dyn SessionObserver>,
    callback_scratch: Mutex<CallbackScratch>,
    drain_scratch: Mutex<Vec<u8>>,
    dump: Mutex<Option<WavDump>>,
}

/// Reusable buffers for the device-thread path. Only the capture loop
/// thread ever takes this lock, so it is effectively uncontended.
struct CallbackScratch {
    raw: Vec<f32>,
    mono: Vec<f32>,
}

impl CapturePipeline {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        config: &DuplexConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, AudioError> {
        config.validate()?;

        let inner = Arc::new(CaptureInner {
            downmix: config.downmix,
            max_packet_bytes: config.max_packet_bytes,
            sample_rate_hz: config.format.sample_rate_hz,
            dump_dir: config.dump_dir.clone(),
            ring: RingBuffer::with_float_capacity(config.buffer_samples),
            gain: AtomicF32::new(1.0),
            meter: LevelMeter::new("capture"),
            phase: Mutex::new(CapturePhase::Idle),
            observer: Arc::clone(&observer),
            callback_scratch: Mutex::new(CallbackScratch {
                raw: Vec::new(),
                mono: Vec::new(),
            }),
            drain_scratch: Mutex::new(vec![0u8; config.max_packet_bytes]),
            dump: Mutex::new(None),
        });

        let session = DeviceSession::new(
            Direction::Capture,
            backend,
            SessionIo::Capture(Arc::clone(&inner) as Arc<dyn CaptureHandler>),
            SessionOptions::from_config(config),
            observer,
        );

        Ok(Self { inner, session })
    }

    /// Request capture. A second start while capturing coalesces to a no-op,
    /// and a start racing a recent stop cancels it (the session keeps
    /// running instead of bouncing the device).
    pub fn start(&self) -> Result<(), AudioError> {
        {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, CapturePhase::Capturing) {
                return Ok(());
            }
            *phase = CapturePhase::Starting;
        }

        self.inner.ring.reset();
        if let Some(dir) = &self.inner.dump_dir {
            match WavDump::create(dir, self.inner.sample_rate_hz) {
                Ok(dump) => *self.inner.dump.lock() = Some(dump),
                Err(error) => log::warn!("capture dump disabled: {}", error),
            }
        }
        if let Err(error) = self.session.start() {
            *self.inner.phase.lock() = CapturePhase::Idle;
            return Err(error);
        }
        *self.inner.phase.lock() = CapturePhase::Capturing;
        Ok(())
    }

    /// Request teardown. Asynchronous; coalesces against a following
    /// `start()` inside the session machine.
    pub fn stop(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, CapturePhase::Idle) {
                return;
            }
            *phase = CapturePhase::Stopping;
        }

        self.session.stop();

        if let Some(dump) = self.inner.dump.lock().take() {
            match dump.finalize() {
                Ok(path) => log::info!("capture dump written to {}", path.display()),
                Err(error) => log::warn!("capture dump not finalized: {}", error),
            }
        }
        *self.inner.phase.lock() = CapturePhase::Idle;
    }

    /// Packetize everything currently buffered and push it to `sink`.
    ///
    /// Each packet carries at most the configured byte bound. Metering is a
    /// side effect of the drain and never alters buffer behavior.
    pub fn drain_and_send(&self, sink: &dyn PacketSink) {
        let mut packet_buf = self.inner.drain_scratch.lock();

        loop {
            let n = self.inner.ring.read_bytes(&mut packet_buf[..self.inner.max_packet_bytes]);
            if n == 0 {
                break;
            }

            if let Some(report) = self.inner.meter.record(&packet_buf[..n]) {
                self.inner.observer.on_level(report.volume);
            }

            if let Some(dump) = self.inner.dump.lock().as_mut() {
                if let Err(error) = dump.append_encoded(&packet_buf[..n]) {
                    log::warn!("capture dump write failed: {}", error);
                }
            }

            sink.send(Packet::from_bytes(&packet_buf[..n]));
        }
    }

    /// Drop buffered audio beyond `keep_bytes`, oldest first. Serving a deep
    /// backlog means serving stale audio; discarding is the documented
    /// alternative to letting latency grow.
    pub fn discard_backlog(&self, keep_bytes: usize) {
        let stored = self.inner.ring.byte_count();
        if stored > keep_bytes {
            self.inner.ring.advance(stored - keep_bytes);
        }
    }

    /// Capture gain, settable at any time without a session restart.
    pub fn set_gain(&self, gain: f32) {
        self.inner.gain.store(gain);
    }

    pub fn gain(&self) -> f32 {
        self.inner.gain.load()
    }

    pub fn phase(&self) -> CapturePhase {
        *self.inner.phase.lock()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Bytes buffered and not yet drained.
    pub fn buffered_bytes(&self) -> usize {
        self.inner.ring.byte_count()
    }

    /// Volume from the most recent metering window.
    pub fn volume(&self) -> f32 {
        self.inner.meter.last_volume()
    }
}

impl CaptureHandler for CaptureInner {
    fn on_captured(&self, bytes: &[u8], format: &SampleFormat, _silent: bool) {
        // Silent packets arrive already zeroed; they flow through unchanged
        // so the stream keeps its timing.
        let mut scratch = self.callback_scratch.lock();
        let scratch = &mut *scratch;

        sample_convert::decode_floats(bytes, &mut scratch.raw);
        sample_convert::downmix_to_mono(
            &scratch.raw,
            format.channels as usize,
            self.downmix,
            &mut scratch.mono,
        );

        let gain = self.gain.load();
        if gain != 1.0 {
            for sample in scratch.mono.iter_mut() {
                *sample *= gain;
            }
        }

        let accepted = self.ring.write_floats(&scratch.mono);
        if accepted < scratch.mono.len() {
            log::debug!(
                "capture ring full, dropped {} samples",
                scratch.mono.len() - accepted
            );
        }
    }

    fn on_stopped(&self) {
        self.ring.reset();
    }
}
