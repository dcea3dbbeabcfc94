use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// Wire/device description of an interleaved PCM stream.
///
/// A format is fixed for the lifetime of a device session. Renegotiation
/// means tearing the session down and activating a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Samples per second per channel.
    pub sample_rate_hz: u32,
    /// Interleaved channel count (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Bits per sample (32 for IEEE float).
    pub bits_per_sample: u16,
    /// True for IEEE float samples, false for integer PCM.
    pub is_float: bool,
}

impl SampleFormat {
    /// 32-bit IEEE float format at the given rate and channel count.
    pub const fn ieee_float(sample_rate_hz: u32, channels: u16) -> Self {
        Self {
            sample_rate_hz,
            channels,
            bits_per_sample: 32,
            is_float: true,
        }
    }

    /// Bytes per interleaved frame: `channels * bits_per_sample / 8`.
    pub const fn block_align(&self) -> u32 {
        self.channels as u32 * self.bits_per_sample as u32 / 8
    }

    /// Bytes per second of audio: `sample_rate_hz * block_align`.
    pub const fn bytes_per_second(&self) -> u32 {
        self.sample_rate_hz * self.block_align()
    }

    /// Byte length of `frames` interleaved frames.
    pub const fn frames_to_bytes(&self, frames: u32) -> usize {
        frames as usize * self.block_align() as usize
    }

    /// Frame count held in `bytes` (truncating any partial frame).
    pub const fn bytes_to_frames(&self, bytes: usize) -> u32 {
        (bytes / self.block_align() as usize) as u32
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate_hz == 0 {
            return Err(AudioError::InvalidConfiguration(
                "sample rate must be positive".into(),
            ));
        }
        if self.channels == 0 {
            return Err(AudioError::InvalidConfiguration(
                "channel count must be positive".into(),
            ));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported bits per sample: {}",
                self.bits_per_sample
            )));
        }
        if self.is_float && self.bits_per_sample != 32 {
            return Err(AudioError::InvalidConfiguration(format!(
                "float formats must be 32-bit, got {}",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields() {
        let f = SampleFormat::ieee_float(48_000, 1);
        assert_eq!(f.block_align(), 4);
        assert_eq!(f.bytes_per_second(), 192_000);

        let stereo = SampleFormat::ieee_float(48_000, 2);
        assert_eq!(stereo.block_align(), 8);
        assert_eq!(stereo.frames_to_bytes(480), 3840);
        assert_eq!(stereo.bytes_to_frames(3840), 480);
    }

    #[test]
    fn validate_rejects_degenerate_formats() {
        assert!(SampleFormat::ieee_float(0, 1).validate().is_err());
        assert!(SampleFormat::ieee_float(48_000, 0).validate().is_err());

        let odd_bits = SampleFormat {
            sample_rate_hz: 48_000,
            channels: 1,
            bits_per_sample: 12,
            is_float: false,
        };
        assert!(odd_bits.validate().is_err());

        let short_float = SampleFormat {
            sample_rate_hz: 48_000,
            channels: 1,
            bits_per_sample: 16,
            is_float: true,
        };
        assert!(short_float.validate().is_err());
    }

    #[test]
    fn validate_accepts_common_formats() {
        assert!(SampleFormat::ieee_float(48_000, 1).validate().is_ok());
        assert!(SampleFormat::ieee_float(44_100, 2).validate().is_ok());

        let pcm16 = SampleFormat {
            sample_rate_hz: 16_000,
            channels: 1,
            bits_per_sample: 16,
            is_float: false,
        };
        assert!(pcm16.validate().is_ok());
    }
}
