use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::error::AudioError;
use crate::processing::sample_convert;
use crate::processing::wav;

/// Streaming WAV writer for capture-path diagnosis.
///
/// Converts drained f32 mono audio to 16-bit PCM and appends it to a
/// timestamped file; `finalize` patches the header sizes and drops a JSON
/// sidecar describing the dump. Strictly an offline diagnostic — it is fed
/// from the drain path, never from a device thread.
pub struct WavDump {
    path: PathBuf,
    file: Option<File>,
    sample_rate: u32,
    data_bytes: u64,
    created_at: DateTime<Utc>,
    floats: Vec<f32>,
    pcm: Vec<u8>,
}

/// Sidecar metadata written next to the dump as `*.metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpMetadata {
    pub created_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub data_bytes: u64,
    pub duration_secs: f64,
}

const BIT_DEPTH: u16 = 16;
const CHANNELS: u16 = 1;

impl WavDump {
    /// Create `capture_<timestamp>_<id>.wav` under `dir` with a placeholder
    /// header.
    pub fn create(dir: &Path, sample_rate: u32) -> Result<Self, AudioError> {
        fs::create_dir_all(dir)
            .map_err(|e| AudioError::Storage(format!("failed to create dump directory: {}", e)))?;

        let created_at = Utc::now();
        let file_name = format!(
            "capture_{}_{}.wav",
            created_at.format("%Y%m%dT%H%M%S"),
            Uuid::new_v4()
        );
        let path = dir.join(file_name);

        let mut file = File::create(&path)
            .map_err(|e| AudioError::Storage(format!("failed to create dump file: {}", e)))?;
        let header = wav::generate_wav_header(sample_rate, BIT_DEPTH, CHANNELS, 0);
        file.write_all(&header)
            .map_err(|e| AudioError::Storage(format!("failed to write header: {}", e)))?;

        Ok(Self {
            path,
            file: Some(file),
            sample_rate,
            data_bytes: 0,
            created_at,
            floats: Vec::new(),
            pcm: Vec::new(),
        })
    }

    /// Append a drained block of f32-encoded bytes as 16-bit PCM.
    pub fn append_encoded(&mut self, bytes: &[u8]) -> Result<(), AudioError> {
        sample_convert::decode_floats(bytes, &mut self.floats);
        sample_convert::floats_to_i16_pcm(&self.floats, &mut self.pcm);

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AudioError::Storage("dump already finalized".into()))?;
        file.write_all(&self.pcm)
            .map_err(|e| AudioError::Storage(format!("dump write failed: {}", e)))?;
        self.data_bytes += self.pcm.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, flush, and write the sidecar. Returns the
    /// dump path.
    pub fn finalize(mut self) -> Result<PathBuf, AudioError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| AudioError::Storage("dump already finalized".into()))?;

        let file_size = wav::WAV_HEADER_SIZE as u64 + self.data_bytes;
        file.seek(SeekFrom::Start(4))
            .map_err(|e| AudioError::Storage(e.to_string()))?;
        file.write_all(&((file_size - 8) as u32).to_le_bytes())
            .map_err(|e| AudioError::Storage(e.to_string()))?;

        file.seek(SeekFrom::Start(40))
            .map_err(|e| AudioError::Storage(e.to_string()))?;
        file.write_all(&(self.data_bytes as u32).to_le_bytes())
            .map_err(|e| AudioError::Storage(e.to_string()))?;

        file.flush()
            .map_err(|e| AudioError::Storage(e.to_string()))?;
        drop(file);

        let bytes_per_second = self.sample_rate as f64 * CHANNELS as f64 * BIT_DEPTH as f64 / 8.0;
        let metadata = DumpMetadata {
            created_at: self.created_at,
            sample_rate: self.sample_rate,
            channels: CHANNELS,
            bit_depth: BIT_DEPTH,
            data_bytes: self.data_bytes,
            duration_secs: self.data_bytes as f64 / bytes_per_second,
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| AudioError::Storage(format!("failed to serialize metadata: {}", e)))?;
        fs::write(self.path.with_extension("metadata.json"), json)
            .map_err(|e| AudioError::Storage(format!("failed to write metadata: {}", e)))?;

        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }
}
