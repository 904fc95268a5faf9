//! # Session Management
//!
//! Per-connection conversation state. One `Session` per WebSocket
//! connection, owned exclusively by that connection's actor:
//!
//! - **capture**: verbatim audio byte buffer for the in-progress utterance
//! - **state**: conversation history, mode flags, and the active-turn handle

pub mod capture;
pub mod state;

pub use capture::CaptureBuffer;
pub use state::{ActiveTurn, ChatRole, HistoryEntry, Session, SessionMode};
