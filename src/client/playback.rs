//! # Playback Buffer
//!
//! Client-side reassembly of the server's synthesis stream. Chunks arrive
//! over time (possibly while earlier audio is already playing) and are
//! grouped into *playback units*: one contiguous block of all unplayed
//! chunks, concatenated and handed to the sink at once.
//!
//! ## Start conditions:
//! - a minimum chunk count is buffered while idle (low-latency early start), or
//! - the stream-complete signal arrives with at least one buffered chunk
//!   (short replies that never hit the threshold)
//!
//! While a unit plays, further appends queue behind it; the engine re-checks
//! for unplayed chunks on each unit-ended notification and starts the next
//! unit if any exist.
//!
//! ## Invariant:
//! `played_through <= chunks.len()` always. `reset()` clears both together
//! and stops the sink first, so it is safe mid-playback. This is the
//! barge-in response.

use tracing::debug;

/// Seam to the actual audio engine (HTML audio element, cpal stream, ...).
///
/// The buffer calls `begin_unit` with one fully concatenated block;
/// `unit ended` comes back via [`PlaybackBuffer::on_unit_ended`].
pub trait PlaybackSink {
    /// Start playing one contiguous audio block.
    fn begin_unit(&mut self, audio: Vec<u8>);

    /// Pause the currently playing unit.
    fn pause(&mut self);

    /// Resume the paused unit.
    fn resume(&mut self);

    /// Stop and discard whatever is playing (reset path).
    fn stop(&mut self);
}

/// Tuning for the playback buffer.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Buffered chunks required before auto-starting while idle
    pub min_chunks_to_start: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        // Matches the web client: wait for a few chunks so the first unit
        // doesn't stutter.
        Self {
            min_chunks_to_start: 3,
        }
    }
}

/// Ordered chunk queue plus a played-through index.
pub struct PlaybackBuffer<S: PlaybackSink> {
    chunks: Vec<Vec<u8>>,
    played_through: usize,
    playing: bool,
    paused: bool,
    stream_complete: bool,
    config: PlaybackConfig,
    sink: S,
}

impl<S: PlaybackSink> PlaybackBuffer<S> {
    pub fn new(config: PlaybackConfig, sink: S) -> Self {
        Self {
            chunks: Vec::new(),
            played_through: 0,
            playing: false,
            paused: false,
            stream_complete: false,
            config,
            sink,
        }
    }

    /// Append one received chunk, auto-starting playback at the threshold.
    pub fn append(&mut self, chunk: Vec<u8>) {
        self.chunks.push(chunk);

        if !self.playing && self.chunks.len() >= self.config.min_chunks_to_start {
            self.start_unit();
        }
    }

    /// The synthesis stream for this turn is exhausted.
    ///
    /// Starts a final unit if anything is buffered and idle; otherwise the
    /// tail drains on the next unit-ended notification.
    pub fn mark_stream_complete(&mut self) {
        self.stream_complete = true;
        if !self.playing && self.unplayed_count() > 0 {
            self.start_unit();
        }
    }

    /// Notification from the sink that the current unit finished.
    ///
    /// Drains any chunks that queued up while the unit played.
    pub fn on_unit_ended(&mut self) {
        self.playing = false;
        self.paused = false;
        if self.unplayed_count() > 0 {
            self.start_unit();
        } else if self.stream_complete {
            debug!("playback finished: stream complete and queue drained");
        }
    }

    /// Discard everything, unconditionally. The barge-in response.
    ///
    /// Stops the sink first so a unit mid-playback is silenced before the
    /// queue state goes away; both the queue and the played-through index
    /// are cleared together.
    pub fn reset(&mut self) {
        self.sink.stop();
        self.chunks.clear();
        self.played_through = 0;
        self.playing = false;
        self.paused = false;
        self.stream_complete = false;
    }

    /// Pause the current unit. Idempotent; a no-op while idle.
    pub fn pause(&mut self) {
        if self.playing && !self.paused {
            self.sink.pause();
            self.paused = true;
        }
    }

    /// Resume the paused unit. Idempotent; a no-op unless paused.
    pub fn resume(&mut self) {
        if self.playing && self.paused {
            self.sink.resume();
            self.paused = false;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Chunks currently buffered (played and unplayed).
    pub fn buffered_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Access to the sink (tests inspect what was handed to the engine).
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn unplayed_count(&self) -> usize {
        self.chunks.len() - self.played_through
    }

    /// Concatenate all unplayed chunks into one unit and hand it to the
    /// sink, advancing the played-through index to the current length.
    fn start_unit(&mut self) {
        let unplayed = &self.chunks[self.played_through..];
        if unplayed.is_empty() {
            return;
        }

        let total: usize = unplayed.iter().map(Vec::len).sum();
        let mut unit = Vec::with_capacity(total);
        for chunk in unplayed {
            unit.extend_from_slice(chunk);
        }

        debug!(
            chunks = unplayed.len(),
            bytes = total,
            "starting playback unit"
        );

        self.played_through = self.chunks.len();
        self.playing = true;
        self.paused = false;
        self.sink.begin_unit(unit);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink that records every engine call for inspection.
    pub struct RecordingSink {
        pub units: Vec<Vec<u8>>,
        pub pauses: usize,
        pub resumes: usize,
        pub stops: usize,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                units: Vec::new(),
                pauses: 0,
                resumes: 0,
                stops: 0,
            }
        }
    }

    impl PlaybackSink for RecordingSink {
        fn begin_unit(&mut self, audio: Vec<u8>) {
            self.units.push(audio);
        }

        fn pause(&mut self) {
            self.pauses += 1;
        }

        fn resume(&mut self) {
            self.resumes += 1;
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn buffer(min_chunks: usize) -> PlaybackBuffer<RecordingSink> {
        PlaybackBuffer::new(
            PlaybackConfig {
                min_chunks_to_start: min_chunks,
            },
            RecordingSink::new(),
        )
    }

    #[test]
    fn test_auto_start_at_threshold_concatenates_in_order() {
        let mut pb = buffer(3);
        pb.append(vec![1]);
        pb.append(vec![2]);
        assert!(!pb.is_playing());

        pb.append(vec![3]);
        assert!(pb.is_playing());
        assert_eq!(pb.sink().units, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_appends_during_playback_queue_until_unit_ends() {
        let mut pb = buffer(1);
        pb.append(vec![1]);
        assert_eq!(pb.sink().units.len(), 1);

        // These arrive while the first unit plays: no new unit yet.
        pb.append(vec![2]);
        pb.append(vec![3]);
        assert_eq!(pb.sink().units.len(), 1);

        pb.on_unit_ended();
        assert_eq!(pb.sink().units.len(), 2);
        assert_eq!(pb.sink().units[1], vec![2, 3]);

        // Nothing left: ending the second unit starts no third.
        pb.on_unit_ended();
        assert_eq!(pb.sink().units.len(), 2);
        assert!(!pb.is_playing());
    }

    #[test]
    fn test_stream_complete_flushes_below_threshold() {
        let mut pb = buffer(5);
        pb.append(vec![1]);
        pb.append(vec![2]);
        assert!(!pb.is_playing());

        pb.mark_stream_complete();
        assert!(pb.is_playing());
        assert_eq!(pb.sink().units, vec![vec![1, 2]]);
    }

    #[test]
    fn test_stream_complete_with_empty_queue_is_noop() {
        let mut pb = buffer(3);
        pb.mark_stream_complete();
        assert!(!pb.is_playing());
        assert!(pb.sink().units.is_empty());
    }

    #[test]
    fn test_reset_plays_only_chunks_appended_after() {
        let mut pb = buffer(2);
        pb.append(vec![1]);
        pb.append(vec![2]); // starts unit [1,2]
        pb.append(vec![3]); // queued

        pb.reset();
        assert_eq!(pb.sink().stops, 1);
        assert_eq!(pb.buffered_chunks(), 0);
        assert!(!pb.is_playing());

        pb.append(vec![7]);
        pb.append(vec![8]);
        assert_eq!(pb.sink().units.last().unwrap(), &vec![7, 8]);
    }

    #[test]
    fn test_reset_safe_mid_playback_and_repeatable() {
        let mut pb = buffer(1);
        pb.append(vec![1]);
        assert!(pb.is_playing());
        pb.reset();
        pb.reset(); // nothing to discard; must not panic or start anything
        assert_eq!(pb.sink().stops, 2);
        assert!(!pb.is_playing());
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let mut pb = buffer(1);
        pb.append(vec![1]);

        pb.pause();
        pb.pause();
        assert_eq!(pb.sink().pauses, 1);
        assert!(pb.is_paused());

        pb.resume();
        pb.resume();
        assert_eq!(pb.sink().resumes, 1);
        assert!(!pb.is_paused());

        // Resume without a pause does nothing.
        pb.resume();
        assert_eq!(pb.sink().resumes, 1);
    }

    #[test]
    fn test_pause_while_idle_is_noop() {
        let mut pb = buffer(3);
        pb.pause();
        assert_eq!(pb.sink().pauses, 0);
        assert!(!pb.is_paused());
    }

    #[test]
    fn test_unit_end_clears_paused_state() {
        let mut pb = buffer(1);
        pb.append(vec![1]);
        pb.pause();
        pb.on_unit_ended();
        assert!(!pb.is_paused());
    }
}
