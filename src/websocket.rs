//! # WebSocket Conversation Handler
//!
//! One actor per connection, owning that connection's `Session` outright.
//! Clients connect to `/ws/chat/{session_id}` and exchange JSON envelopes
//! (see `protocol`): voice-activity controls and audio chunks inbound,
//! pipeline stage broadcasts, transcripts, replies and synthesis chunks
//! outbound.
//!
//! ## Concurrency model:
//! All session mutation happens on the actor. A turn pipeline runs as a
//! detached tokio task and reports back through a `TurnEvent` stream that is
//! attached to the actor context, so its events are handled in order on the
//! same execution context as the socket frames. Events carrying a stale turn
//! id (from a pipeline that was cancelled after a barge-in) are dropped
//! here; the cancellation token handles the task side.
//!
//! ## Barge-in:
//! `user_speaking` while a turn is live fires that turn's token, emits
//! `server_interrupted` (the client's playback reset trigger), and opens a
//! fresh capture window. The interrupted pipeline's remaining output never
//! reaches the wire.

use crate::config::AppConfig;
use crate::pipeline::{run_turn, TurnEvent, TurnEventKind, TurnInput, TurnOutcome, TurnSource};
use crate::protocol::{self, ControlSignal, Envelope};
use crate::providers::ProviderSet;
use crate::recording::RecordingWriter;
use crate::session::{ChatRole, HistoryEntry, Session, SessionMode};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any client traffic before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one conversation session.
pub struct ChatWebSocket {
    /// Per-connection conversation state, owned exclusively by this actor
    session: Session,

    /// Provider bundle handed to each spawned turn
    providers: ProviderSet,

    /// Shared application state (metrics, session slots)
    state: web::Data<AppState>,

    /// Optional archival side channel; `None` when recording is disabled
    recorder: Option<Arc<RecordingWriter>>,

    /// Language hint passed through to the transcription provider
    language: String,

    /// Whether the live turn has reached the streaming stage (controls
    /// whether `server_done` is emitted on completion)
    streaming: bool,

    /// Last time the client showed any sign of life
    last_heartbeat: Instant,
}

impl ChatWebSocket {
    pub fn new(
        session_id: String,
        config: &AppConfig,
        providers: ProviderSet,
        state: web::Data<AppState>,
        recorder: Option<Arc<RecordingWriter>>,
    ) -> Self {
        let mut session = Session::new(
            session_id,
            &config.providers.system_prompt,
            config.audio.max_capture_bytes,
        );
        // Both input paths start enabled; flag envelopes narrow them.
        session.mode = SessionMode {
            voice: true,
            text: true,
        };

        Self {
            session,
            providers,
            state,
            recorder,
            language: config.providers.language.clone(),
            streaming: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Encode and send one envelope, logging (not propagating) failures.
    fn send_envelope(&self, ctx: &mut ws::WebsocketContext<Self>, envelope: &Envelope) {
        match protocol::encode(envelope) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session.id, %err, "failed to encode envelope"),
        }
    }

    fn send_control(&self, ctx: &mut ws::WebsocketContext<Self>, signal: ControlSignal) {
        self.send_envelope(ctx, &Envelope::control(signal));
    }

    /// Barge-in: cancel the live turn, if any, and tell the client to reset
    /// its playback buffer.
    fn interrupt_if_active(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.session.interrupt_active_turn() {
            info!(session_id = %self.session.id, "barge-in: active turn interrupted");
            self.state.record_turn_cancelled();
            self.streaming = false;
            self.send_control(ctx, ControlSignal::ServerInterrupted);
        }
    }

    /// `user_speaking`: interrupt anything in flight and open a capture
    /// window.
    fn handle_user_speaking(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.session.mode.voice {
            debug!(session_id = %self.session.id, "user_speaking while voice mode disabled");
            return;
        }

        self.interrupt_if_active(ctx);
        self.session.begin_capture();
        debug!(session_id = %self.session.id, "capture window opened");
    }

    /// `user_paused`: close the capture window and hand the utterance to a
    /// new turn pipeline.
    fn handle_user_paused(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.session.is_capturing() {
            debug!(session_id = %self.session.id, "user_paused without open capture window");
            return;
        }

        self.session.end_capture();
        let snapshot = self.session.capture.take_snapshot();
        if snapshot.is_empty() {
            debug!(session_id = %self.session.id, "empty capture, no turn started");
            return;
        }

        self.archive_capture(&snapshot);
        self.send_control(ctx, ControlSignal::ServerProcessing);
        self.spawn_turn(ctx, TurnSource::Speech(snapshot));
    }

    /// One inbound audio chunk. Accepted only inside a capture window.
    fn handle_audio_chunk(&mut self, chunk: Vec<u8>) {
        if !self.session.is_capturing() {
            debug!(
                session_id = %self.session.id,
                bytes = chunk.len(),
                "audio chunk outside capture window dropped"
            );
            return;
        }

        if let Err(err) = self.session.capture.append(chunk) {
            // Cap overflow or empty chunk. The capture is abandoned; the
            // client's next user_speaking starts a clean window.
            warn!(session_id = %self.session.id, %err, "capture append rejected");
            self.session.end_capture();
        }
    }

    /// A typed message: goes straight to the generation stage, with the same
    /// barge-in semantics as speech.
    fn handle_typed_text(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.session.mode.text {
            debug!(session_id = %self.session.id, "text message while text mode disabled");
            return;
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        self.interrupt_if_active(ctx);
        self.session
            .push_history(HistoryEntry::new(ChatRole::User, text));
        self.send_control(ctx, ControlSignal::ServerProcessing);
        self.spawn_turn(ctx, TurnSource::Typed);
    }

    /// Flag envelope: mode toggles like `{"voice": "1"}` or `{"text": "0"}`.
    fn handle_flags(&mut self, flags: &serde_json::Value) {
        if let Some(voice) = flag_value(flags, "voice") {
            self.session.mode.voice = voice;
            if !voice && self.session.is_capturing() {
                self.session.end_capture();
            }
        }
        if let Some(text) = flag_value(flags, "text") {
            self.session.mode.text = text;
        }
        debug!(
            session_id = %self.session.id,
            voice = self.session.mode.voice,
            text = self.session.mode.text,
            "session mode updated"
        );
    }

    /// Register a turn and detach its pipeline task. The event stream is
    /// attached to this actor's context so `TurnEvent`s are handled inline
    /// with socket frames.
    fn spawn_turn(&mut self, ctx: &mut ws::WebsocketContext<Self>, source: TurnSource) {
        let (turn_id, cancel) = self.session.start_turn();
        self.streaming = false;
        self.state.record_turn_started();

        let input = TurnInput {
            turn_id,
            source,
            history: self.session.history_snapshot(),
            language: self.language.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        ctx.add_stream(UnboundedReceiverStream::new(rx));

        let providers = self.providers.clone();
        tokio::spawn(run_turn(input, providers, cancel, tx));

        info!(session_id = %self.session.id, turn_id, "turn pipeline spawned");
    }

    /// Best-effort archival; failures are logged and the turn proceeds.
    fn archive_capture(&self, snapshot: &[u8]) {
        if let Some(recorder) = &self.recorder {
            if let Err(err) = recorder.save_utterance(&self.session.id, snapshot) {
                warn!(session_id = %self.session.id, %err, "failed to archive capture");
            }
        }
    }

    /// One decoded inbound envelope.
    fn handle_envelope(&mut self, envelope: Envelope, ctx: &mut ws::WebsocketContext<Self>) {
        match envelope {
            Envelope::Control(ControlSignal::UserSpeaking) => self.handle_user_speaking(ctx),
            Envelope::Control(ControlSignal::UserPaused) => self.handle_user_paused(ctx),
            Envelope::Control(signal) => {
                // server_* values only ever travel server -> client
                warn!(session_id = %self.session.id, ?signal, "unexpected control from client");
            }
            Envelope::Audio(payload) => self.handle_audio_chunk(payload.0),
            Envelope::Text(text) => self.handle_typed_text(text, ctx),
            Envelope::Flag(flags) => self.handle_flags(&flags),
        }
    }
}

/// Parse one mode flag; accepts `"1"`/`"0"` strings and JSON booleans.
fn flag_value(flags: &serde_json::Value, key: &str) -> Option<bool> {
    match flags.get(key)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.as_str() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl Actor for ChatWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id, "conversation session started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session.id, "heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // No persistence beyond connection lifetime: the token fires, the
        // history and capture are dropped, the session slot is released.
        self.session.teardown();
        self.state.release_session();
        info!(session_id = %self.session.id, "conversation session torn down");
    }
}

/// Inbound socket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match protocol::decode(&text) {
                    Ok(envelope) => self.handle_envelope(envelope, ctx),
                    // Malformed frames are dropped, never fatal.
                    Err(err) => {
                        warn!(session_id = %self.session.id, %err, "dropping malformed frame");
                    }
                }
            }
            Ok(ws::Message::Binary(data)) => {
                // Raw binary is treated as a capture chunk, same as an
                // `audio` envelope.
                self.last_heartbeat = Instant::now();
                self.handle_audio_chunk(data.to_vec());
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id, ?reason, "client closed connection");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id, %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl ChatWebSocket {
    /// Map one pipeline event to session-state changes and the envelopes to
    /// put on the wire, in order. Kept free of the socket context so the
    /// mapping is testable on its own.
    fn apply_turn_event(&mut self, event: TurnEvent) -> Vec<Envelope> {
        // Stale events belong to an interrupted pipeline whose token already
        // fired; nothing from it may reach the wire or the history.
        if !self.session.is_current_turn(event.turn_id) {
            debug!(
                session_id = %self.session.id,
                turn_id = event.turn_id,
                "dropping stale turn event"
            );
            return Vec::new();
        }

        match event.kind {
            TurnEventKind::Transcript(text) => {
                self.session
                    .push_history(HistoryEntry::new(ChatRole::User, text.clone()));
                vec![Envelope::text(text)]
            }
            TurnEventKind::Reply(text) => {
                self.session
                    .push_history(HistoryEntry::new(ChatRole::Assistant, text.clone()));
                vec![Envelope::text(text)]
            }
            TurnEventKind::SynthesisStarting => {
                self.streaming = true;
                vec![Envelope::control(ControlSignal::ServerReady)]
            }
            TurnEventKind::AudioChunk(chunk) => {
                vec![Envelope::audio(chunk)]
            }
            TurnEventKind::Completed(outcome) => {
                self.session.finish_turn(event.turn_id);
                let mut out = Vec::new();
                match outcome {
                    TurnOutcome::Done => {
                        // server_done only closes a stream that was opened;
                        // a silent turn (empty transcript) ends without one.
                        if self.streaming {
                            out.push(Envelope::control(ControlSignal::ServerDone));
                        }
                    }
                    // server_interrupted (and the cancellation counter)
                    // already happened on the barge-in transition.
                    TurnOutcome::Cancelled => {}
                    TurnOutcome::Failed(reason) => {
                        // Logged server-side; the client observes silence
                        // and stays connected.
                        error!(
                            session_id = %self.session.id,
                            turn_id = event.turn_id,
                            %reason,
                            "turn failed"
                        );
                        self.state.record_turn_failed();
                    }
                }
                self.streaming = false;
                out
            }
        }
    }
}

/// Pipeline events, delivered on the actor context in emission order.
impl StreamHandler<TurnEvent> for ChatWebSocket {
    fn handle(&mut self, event: TurnEvent, ctx: &mut Self::Context) {
        for envelope in self.apply_turn_event(event) {
            self.send_envelope(ctx, &envelope);
        }
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a `ChatWebSocket` actor.
pub async fn chat_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
    providers: web::Data<ProviderSet>,
) -> ActixResult<HttpResponse> {
    start_chat(req, stream, path.into_inner(), app_state, providers).await
}

/// Same endpoint without a session id in the path; one is generated.
pub async fn chat_websocket_anonymous(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    providers: web::Data<ProviderSet>,
) -> ActixResult<HttpResponse> {
    let session_id = uuid::Uuid::new_v4().to_string();
    start_chat(req, stream, session_id, app_state, providers).await
}

async fn start_chat(
    req: HttpRequest,
    stream: web::Payload,
    session_id: String,
    app_state: web::Data<AppState>,
    providers: web::Data<ProviderSet>,
) -> ActixResult<HttpResponse> {
    info!(
        session_id = %session_id,
        peer = ?req.connection_info().peer_addr(),
        "new conversation connection request"
    );

    if !app_state.try_acquire_session() {
        warn!(session_id = %session_id, "session limit reached, rejecting connection");
        return Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": {
                "type": "capacity",
                "message": "maximum concurrent sessions reached"
            }
        })));
    }

    let config = app_state.get_config();
    let recorder = RecordingWriter::from_config(&config.recording, &config.audio).map(Arc::new);

    let websocket = ChatWebSocket::new(
        session_id.clone(),
        &config,
        providers.get_ref().clone(),
        app_state.clone(),
        recorder,
    );

    // A failed upgrade (e.g. a plain GET with no upgrade headers) never
    // starts the actor, so `stopped` never runs; give the slot back here.
    match ws::start(websocket, &req, stream) {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(session_id = %session_id, %err, "websocket handshake failed");
            app_state.release_session();
            Err(err)
        }
    }
}
