use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AudioError;
use super::format::SampleFormat;

/// Default stream rate for both directions.
pub const BASE_SAMPLE_RATE: u32 = 48_000;

/// Mono samples the spatialization mixer consumes per invocation.
pub const MIXER_CHUNK_SAMPLES: usize = 480;

/// Ring capacity in mono samples: a quarter second at the base rate.
pub const QUARTER_SECOND_SAMPLES: usize = BASE_SAMPLE_RATE as usize / 4;

/// What the render pull substitutes when fewer samples are stored than the
/// device asked for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UnderrunFill {
    /// Low-amplitude sine marker. Makes underruns audible while diagnosing
    /// latency problems instead of hiding them as silence.
    Tone { amplitude: f32, frequency_hz: f32 },
    /// Plain silence.
    Silence,
}

impl UnderrunFill {
    /// The diagnostic marker tone: 1.8 kHz at 2% full scale.
    pub const fn marker_tone() -> Self {
        Self::Tone {
            amplitude: 0.02,
            frequency_hz: 1800.0,
        }
    }
}

impl Default for UnderrunFill {
    fn default() -> Self {
        Self::marker_tone()
    }
}

/// How a multi-channel capture format is folded down to mono.
///
/// Channel selection for array hardware is device-specific, so it is
/// configuration rather than a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownmixPlan {
    /// Average every channel of each frame.
    Average,
    /// Sum the channels whose bit is set in `mask` (bit N = channel N) and
    /// divide by `divisor`.
    ChannelMask { mask: u32, divisor: u16 },
}

impl DownmixPlan {
    /// Layout used by 6-channel array microphones: merge the inner pair
    /// (channels 2 and 3) and halve.
    pub const fn array_mic_default() -> Self {
        Self::ChannelMask {
            mask: (1 << 2) | (1 << 3),
            divisor: 2,
        }
    }
}

impl Default for DownmixPlan {
    fn default() -> Self {
        Self::Average
    }
}

/// Construction-time configuration for the capture and render pipelines.
#[derive(Debug, Clone)]
pub struct DuplexConfig {
    /// Preferred stream format (mono is requested for capture; the device's
    /// negotiated format may differ and is downmixed).
    pub format: SampleFormat,

    /// Ring capacity in mono samples for the capture ring and the render
    /// accumulator.
    pub buffer_samples: usize,

    /// Mono samples consumed per mixer invocation.
    pub chunk_samples: usize,

    /// Upper bound for outbound packet payloads, chosen to stay below the
    /// transport's fragmentation threshold.
    pub max_packet_bytes: usize,

    /// Render-path underrun policy.
    pub underrun_fill: UnderrunFill,

    /// Mono fold-down for multi-channel capture hardware.
    pub downmix: DownmixPlan,

    /// Device buffer duration requested at initialization.
    pub device_buffer: Duration,

    /// How long `stop()` lets the render buffer drain before forcing the
    /// hardware stop.
    pub drain_grace: Duration,

    /// Name fragment used to pick an endpoint when no default exists
    /// (e.g. a specific array-microphone product line).
    pub preferred_device_class: Option<String>,

    /// When set, drained capture audio is also written to a WAV file here
    /// for offline diagnosis.
    pub dump_dir: Option<PathBuf>,
}

impl DuplexConfig {
    pub fn validate(&self) -> Result<(), AudioError> {
        self.format.validate()?;
        if self.chunk_samples == 0 {
            return Err(AudioError::InvalidConfiguration(
                "chunk size must be positive".into(),
            ));
        }
        if self.buffer_samples < self.chunk_samples {
            return Err(AudioError::InvalidConfiguration(format!(
                "buffer of {} samples cannot hold a {}-sample chunk",
                self.buffer_samples, self.chunk_samples
            )));
        }
        if self.max_packet_bytes < 4 {
            return Err(AudioError::InvalidConfiguration(
                "packet bound must hold at least one sample".into(),
            ));
        }
        if let DownmixPlan::ChannelMask { mask, divisor } = self.downmix {
            if mask == 0 || divisor == 0 {
                return Err(AudioError::InvalidConfiguration(
                    "downmix mask and divisor must be non-zero".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            format: SampleFormat::ieee_float(BASE_SAMPLE_RATE, 1),
            buffer_samples: QUARTER_SECOND_SAMPLES,
            chunk_samples: MIXER_CHUNK_SAMPLES,
            max_packet_bytes: crate::transport::MAX_PACKET_BYTES,
            underrun_fill: UnderrunFill::default(),
            downmix: DownmixPlan::default(),
            device_buffer: Duration::from_millis(100),
            drain_grace: Duration::from_millis(500),
            preferred_device_class: None,
            dump_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DuplexConfig::default().validate().is_ok());
    }

    #[test]
    fn buffer_must_hold_a_chunk() {
        let config = DuplexConfig {
            buffer_samples: 100,
            chunk_samples: 480,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn downmix_mask_must_select_channels() {
        let config = DuplexConfig {
            downmix: DownmixPlan::ChannelMask { mask: 0, divisor: 2 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn array_mic_mask_selects_inner_pair() {
        let DownmixPlan::ChannelMask { mask, divisor } = DownmixPlan::array_mic_default() else {
            panic!("expected channel mask");
        };
        assert_eq!(mask, 0b1100);
        assert_eq!(divisor, 2);
    }
}
