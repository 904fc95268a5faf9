//! # Client-Side Components
//!
//! The two pieces that live on the user's end of the connection:
//!
//! - `segmenter`: turns a continuous audio stream plus voice-activity
//!   events into the control/audio frames the server expects
//! - `playback`: reassembles the server's synthesis chunks into playable
//!   units, with barge-in reset and pause/resume
//!
//! They are transport-agnostic: the segmenter pushes envelopes into an
//! outbound queue and the playback buffer reacts to envelopes handed to
//! `apply_server_envelope`. Device access and rendering live behind the
//! `PlaybackSink` seam.

pub mod playback;
pub mod segmenter;

pub use playback::{PlaybackBuffer, PlaybackConfig, PlaybackSink};
pub use segmenter::{CaptureSegmenter, VadEvent};

use crate::protocol::{ControlSignal, Envelope};
use tracing::debug;

/// Route one server envelope to the playback buffer.
///
/// `server_ready` doubles as the reset trigger for the new turn's stream;
/// `server_interrupted` resets on barge-in; `server_done` marks the stream
/// complete so any buffered tail starts playing. Frames that don't concern
/// playback are ignored.
pub fn apply_server_envelope<S: PlaybackSink>(
    playback: &mut PlaybackBuffer<S>,
    envelope: &Envelope,
) {
    match envelope {
        Envelope::Control(ControlSignal::ServerReady)
        | Envelope::Control(ControlSignal::ServerInterrupted) => playback.reset(),
        Envelope::Control(ControlSignal::ServerDone) => playback.mark_stream_complete(),
        Envelope::Audio(payload) => playback.append(payload.0.clone()),
        Envelope::Control(signal) => {
            debug!(?signal, "control message without playback effect");
        }
        Envelope::Text(_) | Envelope::Flag(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::playback::tests::RecordingSink;
    use super::*;
    use crate::protocol::{ControlSignal, Envelope};

    #[test]
    fn test_interrupted_resets_before_new_turn_chunks() {
        // Barge-in on the client: chunks of the interrupted turn are gone
        // before the first chunk of the next turn is appended.
        let mut playback = PlaybackBuffer::new(PlaybackConfig::default(), RecordingSink::new());

        apply_server_envelope(&mut playback, &Envelope::Control(ControlSignal::ServerReady));
        apply_server_envelope(&mut playback, &Envelope::audio(vec![1; 4]));
        apply_server_envelope(&mut playback, &Envelope::audio(vec![2; 4]));

        apply_server_envelope(
            &mut playback,
            &Envelope::Control(ControlSignal::ServerInterrupted),
        );
        assert_eq!(playback.buffered_chunks(), 0);

        apply_server_envelope(&mut playback, &Envelope::Control(ControlSignal::ServerReady));
        apply_server_envelope(&mut playback, &Envelope::audio(vec![9; 4]));
        apply_server_envelope(&mut playback, &Envelope::Control(ControlSignal::ServerDone));

        // Only the new turn's audio reached the sink.
        let units = playback.sink().units.clone();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0], vec![9; 4]);
    }

    #[test]
    fn test_text_and_flag_envelopes_do_not_touch_playback() {
        let mut playback = PlaybackBuffer::new(PlaybackConfig::default(), RecordingSink::new());
        apply_server_envelope(&mut playback, &Envelope::audio(vec![1; 4]));
        apply_server_envelope(&mut playback, &Envelope::text("transcript"));
        apply_server_envelope(
            &mut playback,
            &Envelope::Flag(serde_json::json!({"voice": "1"})),
        );
        assert_eq!(playback.buffered_chunks(), 1);
    }
}
