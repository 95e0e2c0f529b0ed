//! Utterance segmentation: when buffered caller audio becomes a turn.
//!
//! The carrier streams audio continuously, silence included, so "no further
//! audio" means "no further *voiced* audio". Each voiced chunk rearms a
//! single silence deadline; the turn is cut when the deadline passes.

use crate::session::CallSession;
use bytes::Bytes;
use callbridge_types::mulaw_bytes_for;
use callbridge_voice::energy::is_voiced;
use std::time::Duration;
use tokio::time::Instant;

/// Segmentation constants. Not read from the config file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationPolicy {
    /// Quiet time after the last voiced chunk before the turn is cut.
    pub silence_window: Duration,
    /// Shorter buffers are discarded as noise.
    pub min_utterance: Duration,
    /// RMS level (0..1) at which a chunk counts as speech.
    pub energy_threshold: f32,
    /// Continuous speech during playback needed to interrupt it.
    pub barge_in_min: Duration,
}

impl Default for SegmentationPolicy {
    fn default() -> Self {
        Self {
            silence_window: Duration::from_millis(1500),
            min_utterance: Duration::from_millis(500),
            energy_threshold: 0.02,
            barge_in_min: Duration::from_millis(300),
        }
    }
}

impl SegmentationPolicy {
    pub fn min_utterance_bytes(&self) -> usize {
        mulaw_bytes_for(self.min_utterance)
    }

    pub fn barge_in_bytes(&self) -> usize {
        mulaw_bytes_for(self.barge_in_min)
    }
}

/// What to do with one inbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAction {
    AppendAndRearm,
    Append,
    Drop,
}

/// Result of the silence deadline passing.
#[derive(Debug, PartialEq)]
pub enum Segment {
    /// A turn is in flight; the buffer waits for the next window.
    Busy,
    /// Nothing buffered.
    Empty,
    /// Below the minimum duration; the buffer was cleared.
    Discarded { bytes: usize },
    /// A complete utterance, taken out of the buffer.
    Ready(Vec<Bytes>),
}

/// Holds the single pending silence deadline of a session.
#[derive(Debug, Clone)]
pub struct Segmenter {
    policy: SegmentationPolicy,
    deadline: Option<Instant>,
}

impl Segmenter {
    pub fn new(policy: SegmentationPolicy) -> Self {
        Self {
            policy,
            deadline: None,
        }
    }

    pub fn policy(&self) -> &SegmentationPolicy {
        &self.policy
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Replaces any pending deadline with one a full window from `now`.
    pub fn rearm(&mut self, now: Instant) {
        self.deadline = Some(now + self.policy.silence_window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Consumes the deadline if it has passed. Fires at most once per arm.
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Classifies a chunk. Trailing silence belongs to an open utterance, and
    /// audio that arrives mid-turn is kept for the next window; line noise
    /// between turns is not buffered.
    pub fn classify(&self, chunk: &[u8], processing: bool) -> ChunkAction {
        if is_voiced(chunk, self.policy.energy_threshold) {
            ChunkAction::AppendAndRearm
        } else if self.is_armed() || processing {
            ChunkAction::Append
        } else {
            ChunkAction::Drop
        }
    }

    /// Applies a chunk to the session, returning what was done.
    pub fn accept(&mut self, session: &mut CallSession, chunk: Bytes, now: Instant) -> ChunkAction {
        let action = self.classify(&chunk, session.processing);
        match action {
            ChunkAction::AppendAndRearm => {
                session.push_chunk(chunk);
                self.rearm(now);
            }
            ChunkAction::Append => session.push_chunk(chunk),
            ChunkAction::Drop => {}
        }
        action
    }

    /// Decides what the passed deadline means for the session's buffer.
    pub fn segment(&self, session: &mut CallSession) -> Segment {
        if session.processing {
            return Segment::Busy;
        }
        if !session.has_audio() {
            return Segment::Empty;
        }
        let bytes = session.buffered_bytes();
        if bytes < self.policy.min_utterance_bytes() {
            session.clear_buffer();
            return Segment::Discarded { bytes };
        }
        Segment::Ready(session.take_utterance())
    }
}
