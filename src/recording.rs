//! # Utterance Archival
//!
//! Optional side channel that writes each captured utterance to disk as a
//! pair of files: the raw PCM bytes verbatim, and the same bytes wrapped in
//! a minimal 44-byte WAV header so the capture can be auditioned in any
//! player.
//!
//! Archival is strictly best-effort. A failed write must never affect the
//! turn that produced the audio, so callers log the error and move on.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::info;
use uuid::Uuid;

use crate::config::{AudioConfig, RecordingConfig};
use crate::error::{AppError, AppResult};

/// PCM format parameters stamped into the WAV header.
#[derive(Debug, Clone, Copy)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl From<&AudioConfig> for WavFormat {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            bit_depth: audio.bit_depth,
        }
    }
}

/// Paths of one archived utterance.
#[derive(Debug, Clone)]
pub struct SavedRecording {
    pub pcm_path: PathBuf,
    pub wav_path: PathBuf,
}

/// Writes utterance pairs into a configured directory.
pub struct RecordingWriter {
    directory: PathBuf,
    format: WavFormat,
}

impl RecordingWriter {
    /// Build a writer if recording is enabled, `None` otherwise.
    pub fn from_config(recording: &RecordingConfig, audio: &AudioConfig) -> Option<Self> {
        if !recording.enabled {
            return None;
        }
        Some(Self {
            directory: PathBuf::from(&recording.directory),
            format: WavFormat::from(audio),
        })
    }

    pub fn new(directory: impl Into<PathBuf>, format: WavFormat) -> Self {
        Self {
            directory: directory.into(),
            format,
        }
    }

    /// Archive one utterance under a fresh random name.
    ///
    /// Creates the directory on first use. Returns the written paths so the
    /// caller can log them.
    pub fn save_utterance(&self, session_id: &str, pcm: &[u8]) -> AppResult<SavedRecording> {
        if pcm.is_empty() {
            return Err(AppError::Capture("refusing to archive empty capture".to_string()));
        }

        fs::create_dir_all(&self.directory)?;

        let stem = format!("{}_{}", session_id, Uuid::new_v4());
        let pcm_path = self.directory.join(format!("{}.pcm", stem));
        let wav_path = self.directory.join(format!("{}.wav", stem));

        fs::write(&pcm_path, pcm)?;
        write_wav(&wav_path, pcm, self.format)?;

        info!(
            session_id = %session_id,
            pcm = %pcm_path.display(),
            wav = %wav_path.display(),
            bytes = pcm.len(),
            "archived utterance"
        );

        Ok(SavedRecording { pcm_path, wav_path })
    }
}

/// Write `pcm` to `path` behind a canonical 44-byte WAV header.
fn write_wav(path: &Path, pcm: &[u8], format: WavFormat) -> AppResult<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(&wav_header(pcm.len() as u32, format))?;
    file.write_all(pcm)?;
    Ok(())
}

/// The fixed-layout RIFF/WAVE header for uncompressed PCM.
fn wav_header(pcm_len: u32, format: WavFormat) -> Vec<u8> {
    let bytes_per_sample = u32::from(format.bit_depth) / 8;
    let byte_rate = format.sample_rate * u32::from(format.channels) * bytes_per_sample;
    let block_align = format.channels * (format.bit_depth / 8);

    let mut header = Vec::with_capacity(44);
    // Infallible: Vec<u8> writes cannot fail.
    let _ = header.write_all(b"RIFF");
    let _ = header.write_u32::<LittleEndian>(36 + pcm_len);
    let _ = header.write_all(b"WAVE");

    let _ = header.write_all(b"fmt ");
    let _ = header.write_u32::<LittleEndian>(16);
    let _ = header.write_u16::<LittleEndian>(1); // PCM
    let _ = header.write_u16::<LittleEndian>(format.channels);
    let _ = header.write_u32::<LittleEndian>(format.sample_rate);
    let _ = header.write_u32::<LittleEndian>(byte_rate);
    let _ = header.write_u16::<LittleEndian>(block_align);
    let _ = header.write_u16::<LittleEndian>(format.bit_depth);

    let _ = header.write_all(b"data");
    let _ = header.write_u32::<LittleEndian>(pcm_len);

    header
}
