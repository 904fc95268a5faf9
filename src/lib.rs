//! # Voice Chat Backend
//!
//! An interruptible voice/text conversation service. Clients hold one
//! WebSocket connection, stream voice-activity-segmented audio (or typed
//! text) up, and receive transcripts, generated replies and synthesized
//! audio chunks back on the same connection. Barge-in cancels the in-flight
//! turn instantly.
//!
//! ## Module Map:
//! - **config**: TOML file + environment configuration
//! - **state**: cross-connection shared state and service metrics
//! - **error**: custom error types and HTTP error responses
//! - **protocol**: the JSON `{type, value}` wire envelope
//! - **session**: per-connection conversation state and capture buffer
//! - **providers**: the STT/LLM/TTS seams the pipeline runs against
//! - **pipeline**: the cancellable turn state machine
//! - **websocket**: the per-connection actor at `/ws/chat/{session_id}`
//! - **recording**: optional PCM/WAV archival of captured utterances
//! - **client**: the client-side segmenter and playback buffer
//! - **health / handlers / middleware**: HTTP surface around the socket

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod pipeline;
pub mod protocol;
pub mod providers;
pub mod recording;
pub mod session;
pub mod state;
pub mod websocket;
