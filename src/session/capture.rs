//! # Capture Buffer
//!
//! Accumulates the audio chunks of one in-progress utterance, verbatim and
//! in arrival order. No resampling, no windowing, no eviction: the
//! transcription provider receives exactly the concatenation of what was
//! captured between the speech-start and speech-end boundaries.
//!
//! The only transformation ever applied is the snapshot concatenation at
//! segment end. A configurable byte cap bounds one utterance so a stuck
//! voice-activity detector cannot grow memory without limit; an append past
//! the cap fails with an observable error rather than silently dropping
//! data.

use crate::error::{AppError, AppResult};

/// Ordered byte chunks for one utterance.
#[derive(Debug)]
pub struct CaptureBuffer {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
    max_bytes: usize,
}

impl CaptureBuffer {
    /// Create a buffer bounded at `max_bytes` per utterance.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: Vec::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Append one received audio chunk.
    ///
    /// Chunks are stored exactly as received. Fails when the chunk is empty
    /// or when accepting it would exceed the per-utterance cap.
    pub fn append(&mut self, chunk: Vec<u8>) -> AppResult<()> {
        if chunk.is_empty() {
            return Err(AppError::Capture("empty audio chunk".to_string()));
        }

        if self.total_bytes + chunk.len() > self.max_bytes {
            return Err(AppError::Capture(format!(
                "capture exceeds {} byte limit",
                self.max_bytes
            )));
        }

        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        Ok(())
    }

    /// Concatenate all chunks in arrival order and clear the buffer.
    ///
    /// This is the segment-end snapshot handed to the transcription
    /// provider. The buffer is ready for the next utterance afterwards.
    pub fn take_snapshot(&mut self) -> Vec<u8> {
        let mut combined = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks.drain(..) {
            combined.extend_from_slice(&chunk);
        }
        self.total_bytes = 0;
        combined
    }

    /// Discard any buffered chunks (residual data from an abandoned segment).
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total buffered bytes across all chunks.
    pub fn len_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of chunks received so far for this utterance.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
