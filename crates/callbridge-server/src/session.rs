//! Per-call state.

use bytes::Bytes;
use callbridge_types::{mulaw_duration, CallerIdentity, ConversationTurn};
use std::collections::VecDeque;
use std::time::Duration;

/// Rolling conversation history, oldest turns dropped first.
#[derive(Debug, Clone)]
pub struct History {
    turns: VecDeque<ConversationTurn>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(limit.min(64)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() == self.limit {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        for turn in turns {
            self.push(turn);
        }
    }

    /// The most recent `n` turns, oldest first.
    pub fn window(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// State owned by one media socket. Nothing here outlives the connection.
#[derive(Debug)]
pub struct CallSession {
    pub identity: CallerIdentity,
    /// Assigned by the carrier's `start` frame.
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    buffer: Vec<Bytes>,
    buffered_bytes: usize,
    /// Set while a turn is in flight; at most one per session.
    pub processing: bool,
    pub history: History,
}

impl CallSession {
    pub fn new(identity: CallerIdentity, history_limit: usize) -> Self {
        Self {
            identity,
            stream_sid: None,
            call_sid: None,
            buffer: Vec::new(),
            buffered_bytes: 0,
            processing: false,
            history: History::new(history_limit),
        }
    }

    pub fn is_started(&self) -> bool {
        self.stream_sid.is_some()
    }

    /// Appends a chunk in arrival order.
    pub fn push_chunk(&mut self, chunk: Bytes) {
        self.buffered_bytes += chunk.len();
        self.buffer.push(chunk);
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn buffered_duration(&self) -> Duration {
        mulaw_duration(self.buffered_bytes)
    }

    pub fn has_audio(&self) -> bool {
        self.buffered_bytes > 0
    }

    /// Takes the whole buffer, leaving it empty.
    pub fn take_utterance(&mut self) -> Vec<Bytes> {
        self.buffered_bytes = 0;
        std::mem::take(&mut self.buffer)
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.buffered_bytes = 0;
    }
}
