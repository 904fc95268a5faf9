//! # Turn Execution
//!
//! One turn = one user utterance (or typed message) driven through the
//! provider chain. The pipeline runs as a detached tokio task spawned by
//! the connection actor and reports back exclusively through `TurnEvent`s
//! on an unbounded channel; it never touches session state directly.
//!
//! ## State machine:
//! `Transcribing → Generating → Synthesizing → Streaming → Done`, with
//! `Cancelled` and `Failed` reachable from every stage.
//!
//! ## Cancellation contract:
//! Every provider call is awaited inside `tokio::select!` against the
//! turn's `CancellationToken`, and the token is re-checked before each
//! event send. A provider result that lands after the token fired is
//! discarded, so a cancelled turn can never commit a message or a history
//! mutation. The actor additionally drops events carrying a stale turn id.
//!
//! Synthesized chunks are forwarded the moment the provider stream yields
//! them; nothing is buffered server-side.

use crate::error::AppError;
use crate::providers::ProviderSet;
use crate::session::state::{ChatRole, HistoryEntry};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What starts the turn: a captured utterance or a typed message.
#[derive(Debug, Clone)]
pub enum TurnSource {
    /// Verbatim capture snapshot; goes through transcription first
    Speech(Vec<u8>),
    /// User-typed text; the actor already appended the user entry, the
    /// pipeline starts at the generation stage
    Typed,
}

/// Everything a turn needs, snapshotted at spawn time.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub turn_id: u64,
    pub source: TurnSource,
    /// History snapshot; for `Typed` it already ends with the user entry
    pub history: Vec<HistoryEntry>,
    /// Language hint for the transcription provider
    pub language: String,
}

/// Terminal result of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Ran to completion (including the silent empty-transcript case)
    Done,
    /// Token fired mid-flight; all in-flight work discarded
    Cancelled,
    /// A provider failed; the session returns to idle
    Failed(String),
}

/// One pipeline-to-actor notification.
#[derive(Debug, Clone)]
pub struct TurnEvent {
    pub turn_id: u64,
    pub kind: TurnEventKind,
}

#[derive(Debug, Clone)]
pub enum TurnEventKind {
    /// Non-empty transcript; actor appends the `user` history entry and
    /// forwards the text to the client before generation proceeds
    Transcript(String),
    /// Generated reply; actor appends the `assistant` entry and forwards it
    Reply(String),
    /// Synthesis stream is about to yield; actor sends `server_ready`
    SynthesisStarting,
    /// One synthesized chunk, forwarded as an `audio` message immediately
    AudioChunk(Vec<u8>),
    /// Terminal state; actor clears the active-turn handle
    Completed(TurnOutcome),
}

impl TurnEvent {
    fn new(turn_id: u64, kind: TurnEventKind) -> Self {
        Self { turn_id, kind }
    }
}

/// Drive one turn to a terminal state.
///
/// Always emits exactly one `Completed` event last, even on cancellation,
/// so the actor (and tests) can observe the terminal state.
pub async fn run_turn(
    input: TurnInput,
    providers: ProviderSet,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TurnEvent>,
) {
    let outcome = execute(&input, &providers, &cancel, &events).await;

    match &outcome {
        TurnOutcome::Done => debug!(turn_id = input.turn_id, "turn completed"),
        TurnOutcome::Cancelled => info!(turn_id = input.turn_id, "turn cancelled"),
        TurnOutcome::Failed(reason) => {
            error!(turn_id = input.turn_id, %reason, "turn failed");
        }
    }

    // The receiver may already be gone on connection teardown.
    let _ = events.send(TurnEvent::new(
        input.turn_id,
        TurnEventKind::Completed(outcome),
    ));
}

async fn execute(
    input: &TurnInput,
    providers: &ProviderSet,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<TurnEvent>,
) -> TurnOutcome {
    let mut history = input.history.clone();

    // Transcribing
    match &input.source {
        TurnSource::Speech(audio) => {
            let transcript = tokio::select! {
                _ = cancel.cancelled() => return TurnOutcome::Cancelled,
                result = providers.transcriber.transcribe(audio, &input.language) => {
                    match result {
                        Ok(text) => text,
                        Err(err) => return TurnOutcome::Failed(provider_reason("transcription", err)),
                    }
                }
            };

            let transcript = transcript.trim().to_string();
            if transcript.is_empty() {
                // Nothing intelligible was said; end the turn silently.
                return TurnOutcome::Done;
            }

            // Commit point: the transcript reaches the client (and history)
            // before the generation call is made.
            if cancel.is_cancelled() {
                return TurnOutcome::Cancelled;
            }
            if events
                .send(TurnEvent::new(
                    input.turn_id,
                    TurnEventKind::Transcript(transcript.clone()),
                ))
                .is_err()
            {
                return TurnOutcome::Cancelled;
            }

            history.push(HistoryEntry::new(ChatRole::User, transcript));
        }
        // The actor already appended the typed user entry to the snapshot.
        TurnSource::Typed => {}
    }

    // Generating
    let reply = tokio::select! {
        _ = cancel.cancelled() => return TurnOutcome::Cancelled,
        result = providers.generator.generate_reply(&history) => {
            match result {
                Ok(text) => text,
                Err(err) => return TurnOutcome::Failed(provider_reason("generation", err)),
            }
        }
    };

    if cancel.is_cancelled() {
        return TurnOutcome::Cancelled;
    }
    if events
        .send(TurnEvent::new(
            input.turn_id,
            TurnEventKind::Reply(reply.clone()),
        ))
        .is_err()
    {
        return TurnOutcome::Cancelled;
    }

    // Synthesizing
    let mut chunk_stream = tokio::select! {
        _ = cancel.cancelled() => return TurnOutcome::Cancelled,
        result = providers.synthesizer.synthesize(&reply) => {
            match result {
                Ok(stream) => stream,
                Err(err) => return TurnOutcome::Failed(provider_reason("synthesis", err)),
            }
        }
    };

    if cancel.is_cancelled() {
        return TurnOutcome::Cancelled;
    }
    if events
        .send(TurnEvent::new(input.turn_id, TurnEventKind::SynthesisStarting))
        .is_err()
    {
        return TurnOutcome::Cancelled;
    }

    // Streaming: forward each chunk as it arrives
    let mut chunks_emitted = 0usize;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return TurnOutcome::Cancelled,
            chunk = chunk_stream.next() => chunk,
        };

        match next {
            Some(Ok(chunk)) => {
                if cancel.is_cancelled() {
                    return TurnOutcome::Cancelled;
                }
                if events
                    .send(TurnEvent::new(input.turn_id, TurnEventKind::AudioChunk(chunk)))
                    .is_err()
                {
                    return TurnOutcome::Cancelled;
                }
                chunks_emitted += 1;
            }
            Some(Err(err)) => {
                return TurnOutcome::Failed(provider_reason("synthesis stream", err));
            }
            None => break,
        }
    }

    debug!(
        turn_id = input.turn_id,
        chunks = chunks_emitted,
        "synthesis stream exhausted"
    );
    TurnOutcome::Done
}

fn provider_reason(stage: &str, err: AppError) -> String {
    format!("{}: {}", stage, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::providers::{
        AudioChunkStream, EchoProviders, ReplyGenerator, Synthesizer, Transcriber,
    };
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::{Arc, Mutex};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn speech_input(audio: Vec<u8>) -> TurnInput {
        TurnInput {
            turn_id: 1,
            source: TurnSource::Speech(audio),
            history: vec![HistoryEntry::new(ChatRole::System, "be brief")],
            language: "en".to_string(),
        }
    }

    async fn collect_events(
        mut rx: mpsc::UnboundedReceiver<TurnEvent>,
    ) -> Vec<TurnEventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        kinds
    }

    /// Records the audio blob it was handed, then answers with fixed text.
    struct RecordingTranscriber {
        seen: Arc<Mutex<Vec<u8>>>,
        answer: String,
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn transcribe(&self, audio: &[u8], _language: &str) -> AppResult<String> {
            *self.seen.lock().unwrap() = audio.to_vec();
            Ok(self.answer.clone())
        }
    }

    /// Never resolves; only cancellation can end the stage.
    struct StallingGenerator;

    #[async_trait]
    impl ReplyGenerator for StallingGenerator {
        async fn generate_reply(&self, _history: &[HistoryEntry]) -> AppResult<String> {
            futures_util::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct FailingTranscriber;

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn transcribe(&self, _audio: &[u8], _language: &str) -> AppResult<String> {
            Err(AppError::Provider("upstream 500".to_string()))
        }
    }

    /// Synthesizer driven by a channel the test feeds chunk-by-chunk.
    struct ChannelSynthesizer {
        rx: Mutex<Option<mpsc::UnboundedReceiver<AppResult<Vec<u8>>>>>,
    }

    #[async_trait]
    impl Synthesizer for ChannelSynthesizer {
        async fn synthesize(&self, _text: &str) -> AppResult<AudioChunkStream> {
            let rx = self.rx.lock().unwrap().take().expect("one synthesis call");
            Ok(Box::pin(UnboundedReceiverStream::new(rx)))
        }
    }

    #[tokio::test]
    async fn test_full_turn_event_order() {
        // Uninterrupted voice turn: transcript, reply, ready, audio, done.
        let (tx, rx) = mpsc::unbounded_channel();
        let input = speech_input(vec![1, 2, 3]);
        run_turn(input, ProviderSet::echo(), CancellationToken::new(), tx).await;

        let kinds = collect_events(rx).await;
        assert!(matches!(kinds[0], TurnEventKind::Transcript(_)));
        assert!(matches!(kinds[1], TurnEventKind::Reply(_)));
        assert!(matches!(kinds[2], TurnEventKind::SynthesisStarting));
        let audio_chunks = kinds
            .iter()
            .filter(|k| matches!(k, TurnEventKind::AudioChunk(_)))
            .count();
        assert!(audio_chunks >= 1);
        assert!(matches!(
            kinds.last(),
            Some(TurnEventKind::Completed(TurnOutcome::Done))
        ));
    }

    #[tokio::test]
    async fn test_transcriber_receives_exact_snapshot() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let providers = ProviderSet {
            transcriber: Arc::new(RecordingTranscriber {
                seen: seen.clone(),
                answer: "hello".to_string(),
            }),
            generator: Arc::new(EchoProviders::default()),
            synthesizer: Arc::new(EchoProviders::default()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        run_turn(
            speech_input(vec![10, 20, 30, 40]),
            providers,
            CancellationToken::new(),
            tx,
        )
        .await;
        collect_events(rx).await;

        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_empty_transcript_ends_silently() {
        let providers = ProviderSet {
            transcriber: Arc::new(RecordingTranscriber {
                seen: Arc::new(Mutex::new(Vec::new())),
                answer: "   ".to_string(), // whitespace only
            }),
            generator: Arc::new(EchoProviders::default()),
            synthesizer: Arc::new(EchoProviders::default()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        run_turn(speech_input(vec![1]), providers, CancellationToken::new(), tx).await;

        let kinds = collect_events(rx).await;
        // No transcript, no reply, no audio: just the terminal event.
        assert_eq!(kinds.len(), 1);
        assert!(matches!(
            kinds[0],
            TurnEventKind::Completed(TurnOutcome::Done)
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_reports_failed() {
        let providers = ProviderSet {
            transcriber: Arc::new(FailingTranscriber),
            generator: Arc::new(EchoProviders::default()),
            synthesizer: Arc::new(EchoProviders::default()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        run_turn(speech_input(vec![1]), providers, CancellationToken::new(), tx).await;

        let kinds = collect_events(rx).await;
        assert_eq!(kinds.len(), 1);
        assert!(matches!(
            &kinds[0],
            TurnEventKind::Completed(TurnOutcome::Failed(reason))
                if reason.contains("transcription")
        ));
    }

    #[tokio::test]
    async fn test_barge_in_during_generation_commits_nothing_further() {
        // Property: firing the token while Generating is in flight yields no
        // Reply event (no assistant history commit downstream).
        let providers = ProviderSet {
            transcriber: Arc::new(RecordingTranscriber {
                seen: Arc::new(Mutex::new(Vec::new())),
                answer: "question".to_string(),
            }),
            generator: Arc::new(StallingGenerator),
            synthesizer: Arc::new(EchoProviders::default()),
        };

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_turn(
            speech_input(vec![1, 2]),
            providers,
            cancel.clone(),
            tx,
        ));

        // The transcript event proves the pipeline is past transcription and
        // parked inside the generation await.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first.kind, TurnEventKind::Transcript(_)));

        cancel.cancel();
        handle.await.unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.len(), 1);
        assert!(!kinds
            .iter()
            .any(|k| matches!(k, TurnEventKind::Reply(_))));
        assert!(matches!(
            kinds[0],
            TurnEventKind::Completed(TurnOutcome::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_barge_in_mid_stream_stops_audio() {
        // Barge-in mid-stream: after server_ready and one chunk, the token
        // fires and no further audio is emitted for this turn.
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let providers = ProviderSet {
            transcriber: Arc::new(RecordingTranscriber {
                seen: Arc::new(Mutex::new(Vec::new())),
                answer: "question".to_string(),
            }),
            generator: Arc::new(EchoProviders::default()),
            synthesizer: Arc::new(ChannelSynthesizer {
                rx: Mutex::new(Some(chunk_rx)),
            }),
        };

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_turn(
            speech_input(vec![7]),
            providers,
            cancel.clone(),
            tx,
        ));

        chunk_tx.send(Ok(vec![0xAA; 8])).unwrap();

        // Drain until the first audio chunk arrives mid-stream.
        loop {
            let event = rx.recv().await.unwrap();
            if matches!(event.kind, TurnEventKind::AudioChunk(_)) {
                break;
            }
        }

        cancel.cancel();
        // A late chunk from the provider must be discarded, not forwarded.
        let _ = chunk_tx.send(Ok(vec![0xBB; 8]));
        handle.await.unwrap();

        let mut trailing = Vec::new();
        while let Some(event) = rx.recv().await {
            trailing.push(event.kind);
        }
        assert!(!trailing
            .iter()
            .any(|k| matches!(k, TurnEventKind::AudioChunk(_))));
        assert!(matches!(
            trailing.last(),
            Some(TurnEventKind::Completed(TurnOutcome::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_typed_turn_skips_transcription() {
        let mut history = vec![HistoryEntry::new(ChatRole::System, "be brief")];
        history.push(HistoryEntry::new(ChatRole::User, "typed message"));

        let input = TurnInput {
            turn_id: 3,
            source: TurnSource::Typed,
            history,
            language: "en".to_string(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        run_turn(input, ProviderSet::echo(), CancellationToken::new(), tx).await;

        let kinds = collect_events(rx).await;
        assert!(!kinds
            .iter()
            .any(|k| matches!(k, TurnEventKind::Transcript(_))));
        assert!(matches!(
            &kinds[0],
            TurnEventKind::Reply(reply) if reply.contains("typed message")
        ));
    }
}
