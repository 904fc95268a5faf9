//! # Provider Interfaces
//!
//! The three external services the turn pipeline consumes, each as an
//! opaque, swappable trait object:
//!
//! - `Transcriber`: speech-to-text over one utterance's byte blob
//! - `ReplyGenerator`: response text from the conversation history
//! - `Synthesizer`: text-to-speech as a stream of audio byte chunks
//!
//! Implementations talk to whatever network service is configured; the
//! pipeline never sees past these signatures. Cancellation is handled by
//! the *caller* racing the returned future against the turn token, so
//! providers don't take a token themselves; they only need to tolerate
//! being dropped mid-call.
//!
//! `EchoProviders` is the in-process default used for local development and
//! by the pipeline tests: it transcribes to a fixed marker, echoes the last
//! user entry, and synthesizes deterministic chunks.

use crate::error::{AppError, AppResult};
use crate::session::state::{ChatRole, HistoryEntry};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use std::sync::Arc;

/// Stream of synthesized audio chunks, yielded as soon as the provider
/// produces them.
pub type AudioChunkStream = BoxStream<'static, AppResult<Vec<u8>>>;

/// Speech-to-text over a complete utterance.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance. `audio` is the verbatim capture snapshot in
    /// whatever container the provider requires; `language` is a hint tag.
    async fn transcribe(&self, audio: &[u8], language: &str) -> AppResult<String>;
}

/// Response-text generation from conversation history.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, history: &[HistoryEntry]) -> AppResult<String>;
}

/// Text-to-speech as a chunk stream.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> AppResult<AudioChunkStream>;
}

/// The provider bundle a session pipeline runs against.
#[derive(Clone)]
pub struct ProviderSet {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl ProviderSet {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
        }
    }

    /// In-process echo providers (development default).
    pub fn echo() -> Self {
        let echo = Arc::new(EchoProviders::default());
        Self {
            transcriber: echo.clone(),
            generator: echo.clone(),
            synthesizer: echo,
        }
    }
}

/// Development/test provider: no network, deterministic output.
#[derive(Debug, Clone)]
pub struct EchoProviders {
    /// Number of audio chunks produced per synthesis call
    pub chunks_per_reply: usize,
}

impl Default for EchoProviders {
    fn default() -> Self {
        Self { chunks_per_reply: 3 }
    }
}

#[async_trait]
impl Transcriber for EchoProviders {
    async fn transcribe(&self, audio: &[u8], _language: &str) -> AppResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("[captured {} bytes of speech]", audio.len()))
    }
}

#[async_trait]
impl ReplyGenerator for EchoProviders {
    async fn generate_reply(&self, history: &[HistoryEntry]) -> AppResult<String> {
        let last_user = history
            .iter()
            .rev()
            .find(|entry| entry.role == ChatRole::User)
            .ok_or_else(|| AppError::Provider("no user entry in history".to_string()))?;
        Ok(format!("You said: {}", last_user.content))
    }
}

#[async_trait]
impl Synthesizer for EchoProviders {
    async fn synthesize(&self, text: &str) -> AppResult<AudioChunkStream> {
        let seed = text.as_bytes().first().copied().unwrap_or(0);
        let chunks: Vec<AppResult<Vec<u8>>> = (0..self.chunks_per_reply)
            .map(|i| Ok(vec![seed.wrapping_add(i as u8); 4]))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
