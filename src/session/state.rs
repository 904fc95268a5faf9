//! # Per-Connection Session State
//!
//! One `Session` per WebSocket connection, owned exclusively by that
//! connection's actor. All mutation happens on the actor's execution
//! context; the pipeline task communicates back through messages, never by
//! sharing references. The only cross-task objects are the per-turn
//! `CancellationToken` (single writer: the barge-in transition; many
//! readers: every awaited provider call) and the immutable snapshots handed
//! to a turn at spawn time.
//!
//! ## Invariant:
//! At most one active turn per session at any instant. Starting a new turn
//! requires interrupting (cancelling) the previous one first.

use crate::session::capture::CaptureBuffer;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role of a conversation history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One completed conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Which input paths are enabled for this session.
///
/// Toggled by `flag` envelopes (`{"voice": "1"}`, `{"text": "0"}`). Both can
/// be on at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMode {
    pub voice: bool,
    pub text: bool,
}

/// Handle to the currently running turn pipeline.
///
/// The token is the shared abort signal: fired exactly once, by the
/// barge-in transition (or teardown), and observed by every awaited
/// provider call inside the turn.
#[derive(Debug)]
pub struct ActiveTurn {
    pub id: u64,
    pub cancel: CancellationToken,
}

/// Per-connection conversation state.
pub struct Session {
    /// Connection-scoped identifier (from the connection path, or generated)
    pub id: String,

    /// Enabled input modes
    pub mode: SessionMode,

    /// Ordered conversation history (seeded with the system prompt)
    history: Vec<HistoryEntry>,

    /// Whether audio chunks are currently being accepted into the capture
    capturing: bool,

    /// Audio chunks of the in-progress utterance
    pub capture: CaptureBuffer,

    /// The running pipeline, if any
    active_turn: Option<ActiveTurn>,

    /// Monotonic turn counter; stale pipeline events are detected by id
    next_turn_id: u64,
}

impl Session {
    pub fn new(id: String, system_prompt: &str, max_capture_bytes: usize) -> Self {
        let mut history = Vec::new();
        if !system_prompt.trim().is_empty() {
            history.push(HistoryEntry::new(ChatRole::System, system_prompt));
        }

        Self {
            id,
            mode: SessionMode::default(),
            history,
            capturing: false,
            capture: CaptureBuffer::new(max_capture_bytes),
            active_turn: None,
            next_turn_id: 0,
        }
    }

    /// Begin a capture window ("user speaking"): residual chunks from any
    /// abandoned segment are discarded first.
    pub fn begin_capture(&mut self) {
        self.capture.clear();
        self.capturing = true;
    }

    /// End the capture window ("user paused").
    pub fn end_capture(&mut self) {
        self.capturing = false;
    }

    /// Whether audio chunks are accepted right now.
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Fire the active turn's cancellation token and drop the handle.
    ///
    /// This is the barge-in path. Returns true when a turn was actually
    /// interrupted (the caller then emits `server_interrupted`). The token
    /// is fired before anything else so in-flight provider awaits observe
    /// it at their next boundary.
    pub fn interrupt_active_turn(&mut self) -> bool {
        match self.active_turn.take() {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Register a new active turn, returning its id and token.
    ///
    /// Any previous turn must have been interrupted first; this enforces the
    /// one-active-turn invariant defensively by cancelling a leftover.
    pub fn start_turn(&mut self) -> (u64, CancellationToken) {
        if let Some(previous) = self.active_turn.take() {
            previous.cancel.cancel();
        }

        self.next_turn_id += 1;
        let id = self.next_turn_id;
        let cancel = CancellationToken::new();
        self.active_turn = Some(ActiveTurn {
            id,
            cancel: cancel.clone(),
        });
        (id, cancel)
    }

    /// Whether an event with this turn id belongs to the live turn.
    ///
    /// Late events from a cancelled pipeline carry a stale id and are
    /// dropped by the actor.
    pub fn is_current_turn(&self, turn_id: u64) -> bool {
        matches!(&self.active_turn, Some(turn) if turn.id == turn_id)
    }

    /// Clear the active-turn handle once its pipeline reports terminal state.
    pub fn finish_turn(&mut self, turn_id: u64) {
        if self.is_current_turn(turn_id) {
            self.active_turn = None;
        }
    }

    pub fn has_active_turn(&self) -> bool {
        self.active_turn.is_some()
    }

    /// Append a completed entry to the conversation history.
    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Snapshot of the history for a pipeline spawn.
    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        self.history.clone()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Full teardown on connection close: cancel any running turn and drop
    /// the history (no persistence beyond connection lifetime).
    pub fn teardown(&mut self) {
        self.interrupt_active_turn();
        self.history.clear();
        self.capture.clear();
        self.capturing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("test-session".to_string(), "be brief", 1024)
    }

    #[test]
    fn test_system_prompt_seeds_history() {
        let s = session();
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].role, ChatRole::System);
    }

    #[test]
    fn test_begin_capture_clears_residue() {
        let mut s = session();
        s.begin_capture();
        s.capture.append(vec![1, 2, 3]).unwrap();
        // Segment abandoned, a new one starts
        s.begin_capture();
        assert!(s.capture.is_empty());
        assert!(s.is_capturing());
    }

    #[test]
    fn test_interrupt_fires_token_and_clears_handle() {
        let mut s = session();
        let (_, cancel) = s.start_turn();
        assert!(s.has_active_turn());

        assert!(s.interrupt_active_turn());
        assert!(cancel.is_cancelled());
        assert!(!s.has_active_turn());

        // Nothing left to interrupt
        assert!(!s.interrupt_active_turn());
    }

    #[test]
    fn test_one_active_turn_invariant() {
        let mut s = session();
        let (first_id, first_cancel) = s.start_turn();
        let (second_id, second_cancel) = s.start_turn();

        // Starting a new turn cancels a leftover one
        assert!(first_cancel.is_cancelled());
        assert!(!second_cancel.is_cancelled());
        assert!(!s.is_current_turn(first_id));
        assert!(s.is_current_turn(second_id));
    }

    #[test]
    fn test_stale_turn_events_detected() {
        let mut s = session();
        let (first_id, _) = s.start_turn();
        s.interrupt_active_turn();
        let (second_id, _) = s.start_turn();

        assert!(!s.is_current_turn(first_id));
        assert!(s.is_current_turn(second_id));

        s.finish_turn(first_id); // stale finish is a no-op
        assert!(s.has_active_turn());
        s.finish_turn(second_id);
        assert!(!s.has_active_turn());
    }

    #[test]
    fn test_teardown_cancels_and_clears() {
        let mut s = session();
        s.begin_capture();
        s.capture.append(vec![1]).unwrap();
        s.push_history(HistoryEntry::new(ChatRole::User, "hi"));
        let (_, cancel) = s.start_turn();

        s.teardown();
        assert!(cancel.is_cancelled());
        assert!(s.history().is_empty());
        assert!(s.capture.is_empty());
        assert!(!s.is_capturing());
    }
}
