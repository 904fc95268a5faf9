//! # Wire Protocol Codec
//!
//! Encodes and decodes the JSON envelope exchanged over the WebSocket
//! connection. Every frame is a `{ "type": ..., "value": ... }` object:
//!
//! ## Message Format:
//! - **control**: session-lifecycle signals as snake_case strings
//!   (`user_speaking`, `user_paused`, `server_processing`, `server_ready`,
//!   `server_interrupted`, `server_done`)
//! - **audio**: raw bytes carried as a JSON array of integers (the legacy
//!   client double-encodes this as a string containing the array; decode
//!   accepts both forms)
//! - **text**: transcript / generated reply / user-typed text
//! - **flag**: JSON object of capture-mode switches (`{"voice": "1"}`)
//!
//! No chunk sequence numbers are transmitted: ordering relies on the
//! transport delivering frames in order within a connection.
//!
//! Decode failures never tear down a session. Callers log and drop the frame.

use crate::error::{AppError, AppResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Session-lifecycle control signals carried in `control` envelopes.
///
/// Client → server: `UserSpeaking`, `UserPaused`.
/// Server → client: `ServerProcessing`, `ServerReady`, `ServerInterrupted`,
/// `ServerDone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Voice-activity boundary: the user started speaking
    UserSpeaking,
    /// Voice-activity boundary: the user stopped speaking
    UserPaused,
    /// Pipeline accepted an utterance and is working on it
    ServerProcessing,
    /// Synthesis stream is about to start; client must reset its playback buffer
    ServerReady,
    /// Active turn was cancelled by barge-in; client must reset playback
    ServerInterrupted,
    /// Synthesis stream for the current turn is exhausted
    ServerDone,
}

/// One wire frame: the envelope `type` selects how `value` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Envelope {
    /// Session-lifecycle signal
    Control(ControlSignal),
    /// Audio payload (captured speech or synthesized response)
    Audio(AudioPayload),
    /// Plain text (transcript, reply, or typed input)
    Text(String),
    /// Capture-mode flags, e.g. `{"voice": "1", "text": "0"}`
    Flag(serde_json::Value),
}

/// Raw audio bytes with the array-of-integers wire encoding.
///
/// ## Encoding:
/// Serializes as a plain JSON array of byte values. Deserialization also
/// accepts a JSON *string* containing such an array, which is what the
/// original web client produces (`JSON.stringify(Array.from(data))`).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload(pub Vec<u8>);

impl Serialize for AudioPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for AudioPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(Vec<u8>),
            Stringified(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(bytes) => Ok(AudioPayload(bytes)),
            Repr::Stringified(inner) => {
                let bytes: Vec<u8> = serde_json::from_str(&inner)
                    .map_err(|e| D::Error::custom(format!("nested audio array: {}", e)))?;
                Ok(AudioPayload(bytes))
            }
        }
    }
}

impl From<Vec<u8>> for AudioPayload {
    fn from(bytes: Vec<u8>) -> Self {
        AudioPayload(bytes)
    }
}

impl Envelope {
    /// Shorthand for a control frame.
    pub fn control(signal: ControlSignal) -> Self {
        Envelope::Control(signal)
    }

    /// Shorthand for an audio frame.
    pub fn audio(bytes: Vec<u8>) -> Self {
        Envelope::Audio(AudioPayload(bytes))
    }

    /// Shorthand for a text frame.
    pub fn text(content: impl Into<String>) -> Self {
        Envelope::Text(content.into())
    }
}

/// Encode an envelope to its JSON wire form.
pub fn encode(envelope: &Envelope) -> AppResult<String> {
    serde_json::to_string(envelope)
        .map_err(|e| AppError::Protocol(format!("encode failed: {}", e)))
}

/// Decode a wire frame.
///
/// Malformed frames come back as `AppError::Protocol`; the caller logs and
/// drops them without touching session state.
pub fn decode(raw: &str) -> AppResult<Envelope> {
    serde_json::from_str(raw).map_err(|e| AppError::Protocol(format!("invalid frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_round_trip() {
        let frame = encode(&Envelope::Control(ControlSignal::UserSpeaking)).unwrap();
        assert!(frame.contains("\"control\""));
        assert!(frame.contains("user_speaking"));
        assert_eq!(
            decode(&frame).unwrap(),
            Envelope::Control(ControlSignal::UserSpeaking)
        );
    }

    #[test]
    fn test_audio_array_of_integers() {
        let frame = encode(&Envelope::audio(vec![0, 127, 255])).unwrap();
        assert_eq!(frame, r#"{"type":"audio","value":[0,127,255]}"#);
        assert_eq!(decode(&frame).unwrap(), Envelope::audio(vec![0, 127, 255]));
    }

    #[test]
    fn test_audio_accepts_stringified_array() {
        // The original web client sends JSON.stringify(Array.from(bytes))
        // inside the value field.
        let frame = r#"{"type":"audio","value":"[1,2,3]"}"#;
        assert_eq!(decode(frame).unwrap(), Envelope::audio(vec![1, 2, 3]));
    }

    #[test]
    fn test_text_and_flag_round_trip() {
        let text = Envelope::text("hello there");
        assert_eq!(decode(&encode(&text).unwrap()).unwrap(), text);

        let flag = Envelope::Flag(serde_json::json!({ "voice": "1" }));
        assert_eq!(decode(&encode(&flag).unwrap()).unwrap(), flag);
    }

    #[test]
    fn test_malformed_frames_are_errors_not_panics() {
        assert!(decode("not json at all").is_err());
        assert!(decode(r#"{"type":"audio","value":"not an array"}"#).is_err());
        assert!(decode(r#"{"type":"control","value":"reboot_universe"}"#).is_err());
        assert!(decode(r#"{"value":"orphan"}"#).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(decode(r#"{"type":"video","value":[1]}"#).is_err());
    }
}
