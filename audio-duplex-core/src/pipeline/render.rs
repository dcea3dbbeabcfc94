use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::backend::{DeviceBackend, Direction};
use crate::models::config::DuplexConfig;
use crate::models::error::AudioError;
use crate::models::format::SampleFormat;
use crate::models::state::SessionState;
use crate::pipeline::RenderPhase;
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::sample_convert;
use crate::processing::spatial_mixer::{EmitterParams, SpatialMixer, Spatializer};
use crate::session::device_session::{DeviceSession, RenderSource, SessionIo, SessionOptions};
use crate::session::observer::SessionObserver;

/// Speaker-side pipeline: network packets → accumulator ring →
/// spatialization mixer → pull-model device reads.
///
/// A worker thread turns accumulated mono into queued stereo one chunk at a
/// time; the device render thread pulls whatever is queued and the mixer
/// papers over shortfalls with the configured underrun fill, so the pull
/// path never blocks and never comes up short.
pub struct RenderPipeline {
    inner: Arc<RenderInner>,
    session: DeviceSession,
    worker_running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct RenderInner {
    accumulator: RingBuffer,
    mixer: SpatialMixer,
    phase: Mutex<RenderPhase>,
    fill_scratch: Mutex<Vec<f32>>,
}

/// Yield between chunk checks; keeps the worker off the CPU without
/// risking the device buffer running dry.
const WORKER_YIELD: Duration = Duration::from_millis(3);

impl RenderPipeline {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        config: &DuplexConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, AudioError> {
        config.validate()?;

        let inner = Arc::new(RenderInner {
            accumulator: RingBuffer::with_float_capacity(config.buffer_samples),
            mixer: SpatialMixer::new(
                config.chunk_samples,
                config.format.sample_rate_hz,
                config.buffer_samples,
                config.underrun_fill,
            ),
            phase: Mutex::new(RenderPhase::Idle),
            fill_scratch: Mutex::new(Vec::new()),
        });

        // The device side of this pipeline is always the stereo mix the
        // spatialization stage produces.
        let mut options = SessionOptions::from_config(config);
        options.desired_format = SampleFormat::ieee_float(config.format.sample_rate_hz, 2);

        let session = DeviceSession::new(
            Direction::Render,
            backend,
            SessionIo::Render(Arc::clone(&inner) as Arc<dyn RenderSource>),
            options,
            observer,
        );

        Ok(Self {
            inner,
            session,
            worker_running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Request playback. Coalesces while already playing.
    pub fn start(&self) -> Result<(), AudioError> {
        {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, RenderPhase::Playing) {
                return Ok(());
            }
            *phase = RenderPhase::Starting;
        }

        self.inner.accumulator.reset();
        self.inner.mixer.reset();
        self.spawn_worker();

        if let Err(error) = self.session.start() {
            self.halt_worker();
            *self.inner.phase.lock() = RenderPhase::Idle;
            return Err(error);
        }
        *self.inner.phase.lock() = RenderPhase::Playing;
        Ok(())
    }

    /// Request teardown: the mixer worker exits, then the session lets the
    /// device drain before silencing it and clearing every buffer.
    pub fn stop(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, RenderPhase::Idle) {
                return;
            }
            *phase = RenderPhase::Stopping;
        }

        self.halt_worker();
        self.session.stop();
        *self.inner.phase.lock() = RenderPhase::Idle;
    }

    /// Accept an inbound byte range from the transport. Returns the bytes
    /// buffered; under sustained overflow the excess is dropped and the
    /// shortfall shows in the return value.
    pub fn write_from_network(&self, data: &[u8]) -> usize {
        self.inner.accumulator.write_bytes(data)
    }

    /// Render gain, settable at any time without a session restart.
    pub fn set_gain(&self, gain: f32) {
        self.inner.mixer.set_gain(gain);
    }

    pub fn gain(&self) -> f32 {
        self.inner.mixer.gain()
    }

    /// Move the remote emitter or toggle the directional transform.
    pub fn set_emitter(&self, params: EmitterParams) {
        self.inner.mixer.set_emitter(params);
    }

    /// Install or remove the directional transform implementation.
    pub fn set_spatializer(&self, spatializer: Option<Box<dyn Spatializer>>) {
        self.inner.mixer.set_spatializer(spatializer);
    }

    pub fn phase(&self) -> RenderPhase {
        *self.inner.phase.lock()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Mono samples waiting for the mixer.
    pub fn accumulated_samples(&self) -> usize {
        self.inner.accumulator.float_count()
    }

    /// Stereo pairs queued for the device pull.
    pub fn queued_pairs(&self) -> usize {
        self.inner.mixer.stored_pairs()
    }

    fn spawn_worker(&self) {
        if self.worker_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let running = Arc::clone(&self.worker_running);
        let inner = Arc::clone(&self.inner);

        let handle = thread::Builder::new()
            .name("render-mixer".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    // Mix as long as full chunks are queued, then yield.
                    if !inner.mixer.process_chunk(&inner.accumulator) {
                        thread::sleep(WORKER_YIELD);
                    }
                }
            })
            .expect("failed to spawn render mixer thread");
        *self.worker.lock() = Some(handle);
    }

    fn halt_worker(&self) {
        self.worker_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.halt_worker();
    }
}

impl RenderSource for RenderInner {
    fn fill(&self, dest: &mut [u8], format: &SampleFormat) -> usize {
        debug_assert_eq!(format.channels, 2);
        let samples = dest.len() / 4;

        let mut scratch = self.fill_scratch.lock();
        if scratch.len() < samples {
            scratch.resize(samples, 0.0);
        }
        let produced = self.mixer.read_interleaved(&mut scratch[..samples]);
        sample_convert::encode_floats(&scratch[..produced], dest);
        produced * 4
    }

    fn on_stopped(&self) {
        // Guarantee silence for the next start, never replayed samples.
        self.accumulator.reset();
        self.mixer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockBackend;
    use crate::models::config::UnderrunFill;
    use crate::session::observer::NullObserver;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn pipeline(backend: &MockBackend, fill: UnderrunFill) -> RenderPipeline {
        let config = DuplexConfig {
            underrun_fill: fill,
            ..Default::default()
        };
        RenderPipeline::new(
            Arc::new(backend.clone()),
            &config,
            Arc::new(NullObserver),
        )
        .unwrap()
    }

    fn stereo_format() -> SampleFormat {
        SampleFormat::ieee_float(48_000, 2)
    }

    fn encode(samples: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        sample_convert::extend_bytes_from_floats(samples, &mut bytes);
        bytes
    }

    #[test]
    fn empty_pipeline_still_fills_the_full_request() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::Silence);

        // 64 frames of stereo float = 512 bytes, with nothing buffered.
        let mut dest = vec![0xFFu8; 512];
        let produced = pipeline.inner.fill(&mut dest, &stereo_format());

        assert_eq!(produced, 512);
        let mut out = Vec::new();
        sample_convert::decode_floats(&dest, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn tone_fill_is_audible_but_quiet() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::marker_tone());

        let mut dest = vec![0u8; 4096];
        assert_eq!(pipeline.inner.fill(&mut dest, &stereo_format()), 4096);

        let mut out = Vec::new();
        sample_convert::decode_floats(&dest, &mut out);
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.0);
        assert!(peak <= 0.02 + 1e-6);
    }

    #[test]
    fn network_bytes_come_out_spatialized_as_stereo() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::Silence);
        pipeline.spawn_worker();

        // One full chunk of quarter-amplitude mono.
        let written = pipeline.write_from_network(&encode(&vec![0.25f32; 480]));
        assert_eq!(written, 480 * 4);

        let deadline = Instant::now() + WAIT;
        while pipeline.queued_pairs() < 480 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pipeline.queued_pairs(), 480);
        assert_eq!(pipeline.accumulated_samples(), 0);

        let mut dest = vec![0u8; 480 * 8];
        pipeline.inner.fill(&mut dest, &stereo_format());
        let mut out = Vec::new();
        sample_convert::decode_floats(&dest, &mut out);
        // Duplication fallback: both channels carry the mono value.
        assert!((out[0] - 0.25).abs() < 1e-6);
        assert!((out[1] - 0.25).abs() < 1e-6);

        pipeline.halt_worker();
    }

    #[test]
    fn partial_chunk_is_not_consumed() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::Silence);
        pipeline.spawn_worker();

        pipeline.write_from_network(&encode(&vec![0.5f32; 100]));
        thread::sleep(Duration::from_millis(50));

        // Less than one chunk: the mixer must not touch it.
        assert_eq!(pipeline.accumulated_samples(), 100);
        assert_eq!(pipeline.queued_pairs(), 0);

        pipeline.halt_worker();
    }

    #[test]
    fn overflow_reports_short_write() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::Silence);

        let capacity_bytes = 12_000 * 4;
        let big = encode(&vec![0.1f32; 13_000]);
        assert_eq!(pipeline.write_from_network(&big), capacity_bytes);
    }

    #[test]
    fn full_duplex_render_path_reaches_the_device() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::Silence);

        pipeline.start().unwrap();
        assert!(pipeline
            .session()
            .wait_for_state(|s| s.is_running(), WAIT));
        assert_eq!(pipeline.phase(), RenderPhase::Playing);

        pipeline.write_from_network(&encode(&vec![0.25f32; 960]));

        let deadline = Instant::now() + WAIT;
        let mut seen = false;
        while !seen && Instant::now() < deadline {
            let mut rendered = Vec::new();
            sample_convert::decode_floats(&backend.rendered_bytes(), &mut rendered);
            seen = rendered.iter().any(|&s| (s - 0.25).abs() < 1e-6);
            thread::sleep(Duration::from_millis(10));
        }
        assert!(seen, "mixed audio never reached the device");

        pipeline.stop();
        assert!(pipeline
            .session()
            .wait_for_state(|s| s == SessionState::Stopped, WAIT));
        // Stop clears everything: next start begins from silence.
        assert_eq!(pipeline.accumulated_samples(), 0);
        assert_eq!(pipeline.queued_pairs(), 0);
    }

    #[test]
    fn starved_device_pull_never_blocks_under_load() {
        let backend = MockBackend::new();
        let pipeline = pipeline(&backend, UnderrunFill::marker_tone());

        pipeline.start().unwrap();
        assert!(pipeline
            .session()
            .wait_for_state(|s| s.is_running(), WAIT));

        // No network input at all: the device keeps getting full buffers.
        let deadline = Instant::now() + WAIT;
        while backend.rendered_bytes().len() < 38_400 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(backend.rendered_bytes().len() >= 38_400);

        pipeline.stop();
    }
}
