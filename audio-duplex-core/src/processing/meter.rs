use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::sample_convert;

/// Rolling throughput/volume meter for a drained audio stream.
///
/// Purely observational: callers feed it the bytes they drained and it
/// produces a report roughly once a second, logging a one-line summary and a
/// larger 10-second recap. It never influences buffer behavior.
pub struct LevelMeter {
    label: &'static str,
    state: Mutex<MeterState>,
}

/// Snapshot emitted when a metering window closes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReport {
    /// Mean absolute amplitude over the window, 0.0–1.0 for normalized audio.
    pub volume: f32,
    pub reads_per_sec: u32,
    pub bytes_per_sec: u64,
}

struct MeterState {
    window_start: Instant,
    summary_start: Instant,
    window_reads: u32,
    window_bytes: u64,
    amplitude_sum: f64,
    sample_count: u64,
    total_reads: u64,
    total_bytes: u64,
    last_volume: f32,
}

const WINDOW: Duration = Duration::from_secs(1);
const SUMMARY: Duration = Duration::from_secs(10);

impl LevelMeter {
    pub fn new(label: &'static str) -> Self {
        let now = Instant::now();
        Self {
            label,
            state: Mutex::new(MeterState {
                window_start: now,
                summary_start: now,
                window_reads: 0,
                window_bytes: 0,
                amplitude_sum: 0.0,
                sample_count: 0,
                total_reads: 0,
                total_bytes: 0,
                last_volume: 0.0,
            }),
        }
    }

    /// Account one drained block of f32-encoded bytes.
    ///
    /// Returns a report when this call closed the ~1 s window.
    pub fn record(&self, bytes: &[u8]) -> Option<MeterReport> {
        let mut state = self.state.lock();
        state.window_reads += 1;
        state.window_bytes += bytes.len() as u64;
        state.total_reads += 1;
        state.total_bytes += bytes.len() as u64;

        let samples = (bytes.len() / 4) as u64;
        if samples > 0 {
            state.amplitude_sum += sample_convert::average_amplitude(bytes) as f64 * samples as f64;
            state.sample_count += samples;
        }

        let elapsed = state.window_start.elapsed();
        if elapsed < WINDOW {
            return None;
        }

        let volume = if state.sample_count > 0 {
            (state.amplitude_sum / state.sample_count as f64) as f32
        } else {
            0.0
        };
        let report = MeterReport {
            volume,
            reads_per_sec: state.window_reads,
            bytes_per_sec: (state.window_bytes as f64 / elapsed.as_secs_f64()) as u64,
        };
        log::info!(
            "{}: reads/sec={}, bytes/sec={}, volume={:.4}",
            self.label,
            report.reads_per_sec,
            report.bytes_per_sec,
            report.volume
        );

        state.last_volume = volume;
        state.window_start = Instant::now();
        state.window_reads = 0;
        state.window_bytes = 0;
        state.amplitude_sum = 0.0;
        state.sample_count = 0;

        if state.summary_start.elapsed() >= SUMMARY {
            log::info!(
                "{}: summary reads={}, bytes={}",
                self.label,
                state.total_reads,
                state.total_bytes
            );
            state.summary_start = Instant::now();
        }

        Some(report)
    }

    /// Volume from the most recently closed window.
    pub fn last_volume(&self) -> f32 {
        self.state.lock().last_volume
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::sample_convert::extend_bytes_from_floats;

    #[test]
    fn no_report_before_window_closes() {
        let meter = LevelMeter::new("test");
        let mut bytes = Vec::new();
        extend_bytes_from_floats(&[0.5f32; 64], &mut bytes);

        assert!(meter.record(&bytes).is_none());
        assert_eq!(meter.total_bytes(), 256);
        assert_eq!(meter.last_volume(), 0.0);
    }

    #[test]
    fn report_carries_window_volume() {
        let meter = LevelMeter::new("test");
        let mut bytes = Vec::new();
        extend_bytes_from_floats(&[0.5f32, -0.5, 0.5, -0.5], &mut bytes);

        meter.record(&bytes);
        // Force the window shut instead of sleeping a wall-clock second.
        meter.state.lock().window_start = Instant::now() - Duration::from_secs(2);

        let report = meter.record(&bytes).expect("window closed");
        assert!((report.volume - 0.5).abs() < 1e-6);
        assert_eq!(report.reads_per_sec, 2);
        assert!((meter.last_volume() - 0.5).abs() < 1e-6);
    }
}
