//! Bit-level conversions between f32 samples and little-endian byte streams,
//! plus the mono fold-down used on the capture path.
//!
//! Everything here goes through `to_le_bytes`/`from_le_bytes`; no pointer
//! reinterpretation of sample memory anywhere in the crate.

use crate::models::config::DownmixPlan;

/// Append `samples` to `out` as little-endian bytes.
pub fn extend_bytes_from_floats(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 4);
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Encode `samples` into `dest`, which must hold `samples.len() * 4` bytes.
pub fn encode_floats(samples: &[f32], dest: &mut [u8]) {
    debug_assert!(dest.len() >= samples.len() * 4);
    for (i, &sample) in samples.iter().enumerate() {
        dest[i * 4..i * 4 + 4].copy_from_slice(&sample.to_le_bytes());
    }
}

/// Decode whole f32 samples from `bytes` into `out` (cleared first). A
/// trailing partial sample is ignored.
pub fn decode_floats(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(bytes.len() / 4);
    for raw in bytes.chunks_exact(4) {
        out.push(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
    }
}

/// Mean absolute amplitude of the f32 samples encoded in `bytes`.
pub fn average_amplitude(bytes: &[u8]) -> f32 {
    let sample_count = bytes.len() / 4;
    if sample_count == 0 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for raw in bytes.chunks_exact(4) {
        sum += f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]).abs();
    }
    sum / sample_count as f32
}

/// Fold interleaved multi-channel samples down to mono into `out`
/// (cleared first).
///
/// `Average` takes the mean of every channel per frame. `ChannelMask` sums
/// the selected channels and divides by the configured divisor, which is how
/// array microphones with unused outer elements are handled.
pub fn downmix_to_mono(samples: &[f32], channels: usize, plan: DownmixPlan, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(samples);
        return;
    }

    let frame_count = samples.len() / channels;
    out.reserve(frame_count);
    match plan {
        DownmixPlan::Average => {
            let scale = 1.0 / channels as f32;
            for frame in 0..frame_count {
                let mut sum = 0.0f32;
                for ch in 0..channels {
                    sum += samples[frame * channels + ch];
                }
                out.push(sum * scale);
            }
        }
        DownmixPlan::ChannelMask { mask, divisor } => {
            let scale = 1.0 / divisor as f32;
            for frame in 0..frame_count {
                let mut sum = 0.0f32;
                for ch in 0..channels.min(32) {
                    if mask & (1 << ch) != 0 {
                        sum += samples[frame * channels + ch];
                    }
                }
                out.push(sum * scale);
            }
        }
    }
}

/// Convert f32 samples in `[-1.0, 1.0]` to 16-bit PCM bytes, clamping
/// out-of-range values. Used by the diagnostic WAV dump.
pub fn floats_to_i16_pcm(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn byte_codec_round_trip() {
        let samples = [0.0f32, 0.5, -0.5, 1.0, -1.0];
        let mut bytes = Vec::new();
        extend_bytes_from_floats(&samples, &mut bytes);
        assert_eq!(bytes.len(), 20);

        let mut back = Vec::new();
        decode_floats(&bytes, &mut back);
        assert_eq!(back, samples);
    }

    #[test]
    fn decode_ignores_partial_tail() {
        let mut bytes = Vec::new();
        extend_bytes_from_floats(&[0.25f32], &mut bytes);
        bytes.extend_from_slice(&[1, 2, 3]); // partial sample

        let mut out = Vec::new();
        decode_floats(&bytes, &mut out);
        assert_eq!(out, vec![0.25]);
    }

    #[test]
    fn encode_into_slice_matches_extend() {
        let samples = [0.125f32, -0.75];
        let mut dest = [0u8; 8];
        encode_floats(&samples, &mut dest);

        let mut expected = Vec::new();
        extend_bytes_from_floats(&samples, &mut expected);
        assert_eq!(&dest[..], &expected[..]);
    }

    #[test]
    fn amplitude_is_mean_absolute_value() {
        let mut bytes = Vec::new();
        extend_bytes_from_floats(&[0.5f32, -0.5, 0.0, 1.0], &mut bytes);
        assert_abs_diff_eq!(average_amplitude(&bytes), 0.5, epsilon = 1e-6);
        assert_eq!(average_amplitude(&[]), 0.0);
    }

    #[test]
    fn downmix_stereo_average() {
        let stereo = [0.2f32, 0.8, 0.4, 0.6];
        let mut mono = Vec::new();
        downmix_to_mono(&stereo, 2, DownmixPlan::Average, &mut mono);

        assert_eq!(mono.len(), 2);
        assert_abs_diff_eq!(mono[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn downmix_mono_is_passthrough() {
        let samples = [0.1f32, 0.2, 0.3];
        let mut out = Vec::new();
        downmix_to_mono(&samples, 1, DownmixPlan::Average, &mut out);
        assert_eq!(out, samples);
    }

    #[test]
    fn downmix_six_channel_mask() {
        // One frame of 6 channels; mask selects channels 2 and 3.
        let frame = [0.9f32, 0.9, 0.2, 0.4, 0.9, 0.9];
        let mut mono = Vec::new();
        downmix_to_mono(
            &frame,
            6,
            DownmixPlan::ChannelMask {
                mask: 0b1100,
                divisor: 2,
            },
            &mut mono,
        );

        assert_eq!(mono.len(), 1);
        assert_abs_diff_eq!(mono[0], 0.3, epsilon = 1e-6); // (0.2 + 0.4) / 2
    }

    #[test]
    fn i16_pcm_clamps_and_scales() {
        let mut pcm = Vec::new();
        floats_to_i16_pcm(&[0.0, 1.0, -1.0, 2.0], &mut pcm);
        assert_eq!(pcm.len(), 8);

        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), i16::MAX);
    }
}
