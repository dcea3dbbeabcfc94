use std::f32::consts::{FRAC_PI_4, PI};

use parking_lot::Mutex;

use super::AtomicF32;
use super::ring_buffer::RingBuffer;
use crate::models::config::UnderrunFill;

/// Energy floor below which a transformed channel counts as dead output.
const ENERGY_EPSILON: f32 = 1e-8;

/// Sample stride for the coarse energy measure; every point is not needed.
const ENERGY_STRIDE: usize = 10;

/// Directional transform turning one mono chunk into a left/right pair.
///
/// Returning `false` means the transform could not run for this chunk and the
/// caller falls back to plain duplication.
pub trait Spatializer: Send {
    fn process(&mut self, position: [f32; 3], mono: &[f32], left: &mut [f32], right: &mut [f32])
        -> bool;
}

/// Constant-power stereo panner driven by the emitter's horizontal bearing.
///
/// A stand-in for a full HRTF backend: it cannot externalize sources, but it
/// preserves loudness while steering them left/right.
pub struct PanningSpatializer;

impl Spatializer for PanningSpatializer {
    fn process(
        &mut self,
        position: [f32; 3],
        mono: &[f32],
        left: &mut [f32],
        right: &mut [f32],
    ) -> bool {
        let [x, _, z] = position;
        let planar = (x * x + z * z).sqrt();
        if !planar.is_finite() || planar < 1e-6 {
            // Emitter on top of the listener: no usable direction.
            return false;
        }

        let pan = (x / planar).clamp(-1.0, 1.0);
        let angle = (pan + 1.0) * FRAC_PI_4;
        let (left_gain, right_gain) = (angle.cos(), angle.sin());

        for (i, &sample) in mono.iter().enumerate() {
            left[i] = sample * left_gain;
            right[i] = sample * right_gain;
        }
        true
    }
}

/// Position and on/off switch for the remote audio emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterParams {
    /// Emitter position relative to the listener, listener-space metres.
    pub position: [f32; 3],
    /// When false the mixer skips the transform and duplicates mono.
    pub enabled: bool,
}

impl Default for EmitterParams {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 1.0],
            enabled: false,
        }
    }
}

/// Left/right render target kept in lock-step.
///
/// Both channels share one lock and one set of cursors, so the stored count
/// of the two sides is equal at every observable instant. `reset()` zeroes
/// the backing storage as well: this pair feeds the render device, and a
/// reader racing a stop must get silence, not stale samples.
pub struct StereoBuffer {
    inner: Mutex<StereoState>,
}

struct StereoState {
    left: Vec<f32>,
    right: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
    count: usize,
}

impl StereoBuffer {
    pub fn with_capacity(samples_per_channel: usize) -> Self {
        assert!(samples_per_channel > 0);
        Self {
            inner: Mutex::new(StereoState {
                left: vec![0.0; samples_per_channel],
                right: vec![0.0; samples_per_channel],
                write_pos: 0,
                read_pos: 0,
                count: 0,
            }),
        }
    }

    /// Write one left/right pair of equal-length chunks, truncated to the
    /// free space. Returns the sample pairs accepted.
    pub fn write_pair(&self, left: &[f32], right: &[f32]) -> usize {
        debug_assert_eq!(left.len(), right.len());
        let mut state = self.inner.lock();
        let capacity = state.left.len();
        let n = left.len().min(capacity - state.count);
        for i in 0..n {
            let pos = state.write_pos;
            state.left[pos] = left[i];
            state.right[pos] = right[i];
            state.write_pos = (pos + 1) % capacity;
        }
        state.count += n;
        n
    }

    /// Read up to `dest.len() / 2` pairs, interleaved `[L, R, L, R, ...]`.
    /// Returns the pairs copied; the rest of `dest` is untouched.
    pub fn read_interleaved(&self, dest: &mut [f32]) -> usize {
        let mut state = self.inner.lock();
        let capacity = state.left.len();
        let n = (dest.len() / 2).min(state.count);
        for i in 0..n {
            let pos = state.read_pos;
            dest[i * 2] = state.left[pos];
            dest[i * 2 + 1] = state.right[pos];
            state.read_pos = (pos + 1) % capacity;
        }
        state.count -= n;
        n
    }

    /// Stored pairs (identical for both channels).
    pub fn stored_pairs(&self) -> usize {
        self.inner.lock().count
    }

    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.write_pos = 0;
        state.read_pos = 0;
        state.count = 0;
        state.left.fill(0.0);
        state.right.fill(0.0);
    }
}

/// Converts accumulated mono chunks into the stereo render target.
///
/// `process_chunk` consumes exactly one chunk per call and never partially
/// consumes one. Lock order is fixed: the mixing lock is taken first, any
/// ring or stereo buffer lock second, never the other way around.
pub struct SpatialMixer {
    chunk_samples: usize,
    sample_rate_hz: u32,
    fill: UnderrunFill,
    gain: AtomicF32,
    params: Mutex<EmitterParams>,
    mix: Mutex<MixScratch>,
    stereo: StereoBuffer,
}

struct MixScratch {
    mono: Vec<f32>,
    left: Vec<f32>,
    right: Vec<f32>,
    spatializer: Option<Box<dyn Spatializer>>,
}

impl SpatialMixer {
    pub fn new(
        chunk_samples: usize,
        sample_rate_hz: u32,
        capacity_samples: usize,
        fill: UnderrunFill,
    ) -> Self {
        assert!(chunk_samples > 0 && capacity_samples >= chunk_samples);
        Self {
            chunk_samples,
            sample_rate_hz,
            fill,
            gain: AtomicF32::new(1.0),
            params: Mutex::new(EmitterParams::default()),
            mix: Mutex::new(MixScratch {
                mono: vec![0.0; chunk_samples],
                left: vec![0.0; chunk_samples],
                right: vec![0.0; chunk_samples],
                spatializer: None,
            }),
            stereo: StereoBuffer::with_capacity(capacity_samples),
        }
    }

    /// Install or remove the directional transform. Takes effect on the next
    /// chunk; no restart needed.
    pub fn set_spatializer(&self, spatializer: Option<Box<dyn Spatializer>>) {
        self.mix.lock().spatializer = spatializer;
    }

    pub fn set_emitter(&self, params: EmitterParams) {
        *self.params.lock() = params;
    }

    pub fn emitter(&self) -> EmitterParams {
        *self.params.lock()
    }

    /// Output gain, settable at any time from any thread.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Pairs currently queued for the render pull.
    pub fn stored_pairs(&self) -> usize {
        self.stereo.stored_pairs()
    }

    /// Consume one chunk from `accumulator` and queue its stereo render.
    ///
    /// Returns false without touching the accumulator when it holds less
    /// than a full chunk. A transform that fails or produces a dead channel
    /// (coarse energy under epsilon while the input had energy) is discarded
    /// and the mono chunk is duplicated into both channels instead.
    pub fn process_chunk(&self, accumulator: &RingBuffer) -> bool {
        let mut scratch = self.mix.lock();

        if accumulator.float_count() < self.chunk_samples {
            return false;
        }
        let read = accumulator.read_floats(&mut scratch.mono);
        debug_assert_eq!(read, self.chunk_samples);

        let params = *self.params.lock();
        let scratch = &mut *scratch;
        let mut transformed = false;
        if params.enabled {
            if let Some(spatializer) = scratch.spatializer.as_mut() {
                transformed = spatializer.process(
                    params.position,
                    &scratch.mono,
                    &mut scratch.left,
                    &mut scratch.right,
                );
            }
        }

        if transformed && !Self::output_is_live(&scratch.mono, &scratch.left, &scratch.right) {
            transformed = false;
        }

        if !transformed {
            scratch.left.copy_from_slice(&scratch.mono);
            scratch.right.copy_from_slice(&scratch.mono);
        }

        let gain = self.gain.load();
        if gain != 1.0 {
            for sample in scratch.left.iter_mut() {
                *sample *= gain;
            }
            for sample in scratch.right.iter_mut() {
                *sample *= gain;
            }
        }

        self.stereo.write_pair(&scratch.left, &scratch.right);
        true
    }

    /// Pull-model stereo read for the device render path.
    ///
    /// Interleaves the queued pairs into `dest` and fills any shortfall per
    /// the configured underrun policy, so the full request is always
    /// produced. Returns `dest.len()`.
    pub fn read_interleaved(&self, dest: &mut [f32]) -> usize {
        debug_assert_eq!(dest.len() % 2, 0);
        let pairs_requested = dest.len() / 2;
        let pairs_read = self.stereo.read_interleaved(dest);

        match self.fill {
            UnderrunFill::Silence => {
                dest[pairs_read * 2..].fill(0.0);
            }
            UnderrunFill::Tone {
                amplitude,
                frequency_hz,
            } => {
                let rate = self.sample_rate_hz as f32;
                for pair in pairs_read..pairs_requested {
                    let n = (pair - pairs_read) as f32;
                    let value = amplitude * (2.0 * PI * n * frequency_hz / rate).sin();
                    dest[pair * 2] = value;
                    dest[pair * 2 + 1] = value;
                }
            }
        }
        dest.len()
    }

    /// Drop queued output and zero the render target.
    pub fn reset(&self) {
        self.stereo.reset();
    }

    /// Coarse validity check: a transform that turned a live input into a
    /// near-silent channel went wrong.
    fn output_is_live(mono: &[f32], left: &[f32], right: &[f32]) -> bool {
        let input = coarse_energy(mono);
        if input < ENERGY_EPSILON {
            return true; // silent in, silent out is fine
        }
        coarse_energy(left) >= ENERGY_EPSILON && coarse_energy(right) >= ENERGY_EPSILON
    }
}

/// Sum of squared magnitudes sampled every `ENERGY_STRIDE` points.
fn coarse_energy(samples: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    let mut i = 0;
    while i < samples.len() {
        sum += samples[i] * samples[i];
        i += ENERGY_STRIDE;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const CHUNK: usize = 480;

    fn mixer(fill: UnderrunFill) -> SpatialMixer {
        SpatialMixer::new(CHUNK, 48_000, CHUNK * 8, fill)
    }

    fn feed(accumulator: &RingBuffer, samples: usize, value: f32) {
        let data = vec![value; samples];
        assert_eq!(accumulator.write_floats(&data), samples);
    }

    #[test]
    fn no_chunk_no_consumption() {
        let mixer = mixer(UnderrunFill::Silence);
        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);

        feed(&accumulator, CHUNK - 1, 0.5);
        assert!(!mixer.process_chunk(&accumulator));
        // Short of a chunk: nothing consumed.
        assert_eq!(accumulator.float_count(), CHUNK - 1);
    }

    #[test]
    fn duplicates_mono_without_spatializer() {
        let mixer = mixer(UnderrunFill::Silence);
        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);

        feed(&accumulator, CHUNK, 0.25);
        assert!(mixer.process_chunk(&accumulator));
        assert_eq!(accumulator.float_count(), 0);
        assert_eq!(mixer.stored_pairs(), CHUNK);

        let mut out = vec![0.0f32; 8];
        mixer.read_interleaved(&mut out);
        for pair in out.chunks_exact(2) {
            assert_abs_diff_eq!(pair[0], 0.25, epsilon = 1e-6);
            assert_abs_diff_eq!(pair[1], 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn stereo_counts_stay_in_lock_step() {
        let buffer = StereoBuffer::with_capacity(64);
        let chunk = vec![0.5f32; 16];

        for _ in 0..3 {
            buffer.write_pair(&chunk, &chunk);
        }
        assert_eq!(buffer.stored_pairs(), 48);

        let mut out = vec![0.0f32; 20];
        assert_eq!(buffer.read_interleaved(&mut out), 10);
        assert_eq!(buffer.stored_pairs(), 38);
    }

    #[test]
    fn stereo_write_truncates_at_capacity() {
        let buffer = StereoBuffer::with_capacity(10);
        let chunk = vec![1.0f32; 8];

        assert_eq!(buffer.write_pair(&chunk, &chunk), 8);
        assert_eq!(buffer.write_pair(&chunk, &chunk), 2);
        assert_eq!(buffer.stored_pairs(), 10);
    }

    #[test]
    fn stereo_reset_zeroes_storage() {
        let buffer = StereoBuffer::with_capacity(8);
        let chunk = vec![0.9f32; 8];
        buffer.write_pair(&chunk, &chunk);
        buffer.reset();
        assert_eq!(buffer.stored_pairs(), 0);

        // Refill two pairs, then over-read: the untouched region was zeroed,
        // not left holding the old samples.
        buffer.write_pair(&[0.1, 0.2], &[0.1, 0.2]);
        let mut out = vec![7.0f32; 8];
        assert_eq!(buffer.read_interleaved(&mut out), 2);
        assert_eq!(&out[4..], &[7.0; 4]); // reader contract: untouched
    }

    #[test]
    fn panning_steers_toward_the_emitter() {
        let mixer = mixer(UnderrunFill::Silence);
        mixer.set_spatializer(Some(Box::new(PanningSpatializer)));
        mixer.set_emitter(EmitterParams {
            position: [0.5, 0.0, 0.5], // 45° to the right
            enabled: true,
        });

        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);
        feed(&accumulator, CHUNK, 0.5);
        assert!(mixer.process_chunk(&accumulator));

        let mut out = vec![0.0f32; 4];
        mixer.read_interleaved(&mut out);
        let (left, right) = (out[0], out[1]);
        assert!(right.abs() > left.abs());
        assert!(left.abs() > 0.0); // steered, not silenced
        // Constant power: L² + R² ≈ mono².
        assert_abs_diff_eq!(left * left + right * right, 0.25, epsilon = 1e-3);
    }

    #[test]
    fn full_hard_pan_counts_as_degenerate_and_duplicates() {
        // A completely dead channel fails the energy check even when the
        // transform itself succeeded; duplication wins.
        let mixer = mixer(UnderrunFill::Silence);
        mixer.set_spatializer(Some(Box::new(PanningSpatializer)));
        mixer.set_emitter(EmitterParams {
            position: [1.0, 0.0, 0.0], // hard right: left gain ~0
            enabled: true,
        });

        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);
        feed(&accumulator, CHUNK, 0.5);
        assert!(mixer.process_chunk(&accumulator));

        let mut out = vec![0.0f32; 2];
        mixer.read_interleaved(&mut out);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_transform_falls_back_to_duplication() {
        struct DeadTransform;
        impl Spatializer for DeadTransform {
            fn process(&mut self, _: [f32; 3], _: &[f32], left: &mut [f32], right: &mut [f32]) -> bool {
                left.fill(0.0);
                right.fill(0.0);
                true
            }
        }

        let mixer = mixer(UnderrunFill::Silence);
        mixer.set_spatializer(Some(Box::new(DeadTransform)));
        mixer.set_emitter(EmitterParams {
            position: [0.0, 0.0, 1.0],
            enabled: true,
        });

        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);
        feed(&accumulator, CHUNK, 0.5);
        assert!(mixer.process_chunk(&accumulator));

        // Live input through a dead transform: output must be the duplicate.
        let mut out = vec![0.0f32; 2];
        mixer.read_interleaved(&mut out);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn gain_scales_output() {
        let mixer = mixer(UnderrunFill::Silence);
        mixer.set_gain(0.5);

        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);
        feed(&accumulator, CHUNK, 0.8);
        assert!(mixer.process_chunk(&accumulator));

        let mut out = vec![0.0f32; 2];
        mixer.read_interleaved(&mut out);
        assert_abs_diff_eq!(out[0], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn underrun_tone_fills_shortfall() {
        let mixer = mixer(UnderrunFill::marker_tone());
        let mut out = vec![0.0f32; 16];

        assert_eq!(mixer.read_interleaved(&mut out), 16);

        // First pair is sin(0) = 0; later pairs carry the marker.
        assert_abs_diff_eq!(out[0], 0.0, epsilon = 1e-6);
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.0 && peak <= 0.02 + 1e-6);
        // Channels carry the same marker value.
        for pair in out.chunks_exact(2) {
            assert_abs_diff_eq!(pair[0], pair[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn underrun_silence_fills_zeroes() {
        let mixer = mixer(UnderrunFill::Silence);
        let mut out = vec![9.0f32; 8];
        assert_eq!(mixer.read_interleaved(&mut out), 8);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn partial_read_keeps_ordering_then_fills() {
        let mixer = mixer(UnderrunFill::Silence);
        let accumulator = RingBuffer::with_float_capacity(CHUNK * 4);

        let ramp: Vec<f32> = (0..CHUNK).map(|i| i as f32 / CHUNK as f32).collect();
        accumulator.write_floats(&ramp);
        assert!(mixer.process_chunk(&accumulator));

        // Ask for more pairs than are stored.
        let mut out = vec![0.0f32; (CHUNK + 4) * 2];
        assert_eq!(mixer.read_interleaved(&mut out), (CHUNK + 4) * 2);

        // Stored pairs come out in order...
        assert_abs_diff_eq!(out[2], ramp[1], epsilon = 1e-6);
        assert_abs_diff_eq!(out[2 * (CHUNK - 1)], ramp[CHUNK - 1], epsilon = 1e-6);
        // ...and the shortfall is silence.
        assert!(out[CHUNK * 2..].iter().all(|&s| s == 0.0));
    }
}
