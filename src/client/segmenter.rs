//! # Capture Segmenter
//!
//! Client-side gate between the microphone and the wire. A voice-activity
//! detector feeds boundary events; raw frames flow in continuously. Only
//! frames produced *between* a speech-start and speech-end make it onto the
//! wire, bracketed by the `user_speaking` / `user_paused` control messages
//! the server keys its capture window on.
//!
//! Frames outside a speech span are dropped outright. There is no pre-roll
//! buffer: a frame produced before the start event is gone.

use std::collections::VecDeque;

use tracing::debug;

use crate::protocol::{ControlSignal, Envelope};

/// Boundary event from the voice-activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech onset detected with confidence
    SpeechStart,
    /// End of the current speech span
    SpeechEnd,
    /// Low-confidence trigger. Must not toggle any state.
    Misfire,
}

/// VAD-gated frame forwarder.
///
/// Produces envelopes into an internal outbound queue; the transport layer
/// drains it with [`CaptureSegmenter::drain_outbound`] after each event or
/// frame is fed in.
pub struct CaptureSegmenter {
    voice_enabled: bool,
    speaking: bool,
    outbound: VecDeque<Envelope>,
}

impl CaptureSegmenter {
    pub fn new(voice_enabled: bool) -> Self {
        Self {
            voice_enabled,
            speaking: false,
            outbound: VecDeque::new(),
        }
    }

    /// Toggle voice mode.
    ///
    /// Disabling mid-span closes the span cleanly: the server gets a
    /// `user_paused` so its capture window doesn't dangle open.
    pub fn set_voice_mode(&mut self, enabled: bool) {
        if !enabled && self.speaking {
            self.speaking = false;
            self.outbound
                .push_back(Envelope::control(ControlSignal::UserPaused));
        }
        self.voice_enabled = enabled;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one detector event.
    pub fn on_vad_event(&mut self, event: VadEvent) {
        match event {
            VadEvent::SpeechStart => {
                if !self.voice_enabled || self.speaking {
                    return;
                }
                self.speaking = true;
                self.outbound
                    .push_back(Envelope::control(ControlSignal::UserSpeaking));
            }
            VadEvent::SpeechEnd => {
                if !self.speaking {
                    return;
                }
                self.speaking = false;
                self.outbound
                    .push_back(Envelope::control(ControlSignal::UserPaused));
            }
            VadEvent::Misfire => {
                debug!("low-confidence VAD trigger ignored");
            }
        }
    }

    /// Feed one raw audio frame. Forwarded only inside a speech span.
    pub fn on_frame(&mut self, frame: Vec<u8>) {
        if self.speaking {
            self.outbound.push_back(Envelope::audio(frame));
        }
    }

    /// Take everything queued for the wire, in order.
    pub fn drain_outbound(&mut self) -> Vec<Envelope> {
        self.outbound.drain(..).collect()
    }
}
