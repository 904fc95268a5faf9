//! # Turn Pipeline
//!
//! The cancellable state machine that drives one user utterance through
//! transcription → generation → synthesis → streaming.

pub mod turn;

pub use turn::{run_turn, TurnEvent, TurnEventKind, TurnInput, TurnOutcome, TurnSource};
