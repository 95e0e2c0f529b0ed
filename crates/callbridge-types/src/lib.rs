//! Shared types and constants for the callbridge telephony pipeline.
//!
//! This crate holds the wire frames of the carrier's media-stream protocol,
//! the conversation turn model, and caller identity. It performs no I/O so
//! that both the voice adapters and the server can depend on it without
//! pulling in a runtime.

pub mod conversation;
pub mod media;

pub use conversation::{ConversationTurn, Role};
pub use media::{InboundFrame, OutboundFrame};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sample rate of carrier μ-law audio in both directions.
pub const MULAW_SAMPLE_RATE: u32 = 8000;

/// μ-law is one byte per sample, mono.
pub const MULAW_BYTES_PER_SECOND: usize = MULAW_SAMPLE_RATE as usize;

/// Display name used when a caller number has no entry in the name table.
pub const UNKNOWN_CALLER: &str = "Unknown Caller";

/// Estimated playback duration of `len` bytes of carrier μ-law audio.
pub fn mulaw_duration(len: usize) -> Duration {
    Duration::from_millis((len as u64 * 1000) / MULAW_BYTES_PER_SECOND as u64)
}

/// Number of μ-law bytes that cover `duration`.
pub fn mulaw_bytes_for(duration: Duration) -> usize {
    (duration.as_millis() as usize * MULAW_BYTES_PER_SECOND) / 1000
}

/// Who is on the other end of the line.
///
/// Resolved by the caller gate at call setup and carried to the media
/// socket through its connection URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Caller number in E.164 form, exactly as the carrier reported it.
    pub number: String,
    /// Display name from the static caller table.
    pub name: String,
}

impl CallerIdentity {
    pub fn new(number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
        }
    }

    /// Identity for a caller whose number is not known.
    pub fn unknown() -> Self {
        Self::new("", UNKNOWN_CALLER)
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_byte_count() {
        assert_eq!(mulaw_duration(16_800), Duration::from_millis(2100));
        assert_eq!(mulaw_duration(2_400), Duration::from_millis(300));
        assert_eq!(mulaw_duration(0), Duration::ZERO);
    }

    #[test]
    fn bytes_for_duration() {
        assert_eq!(mulaw_bytes_for(Duration::from_millis(500)), 4000);
        assert_eq!(mulaw_bytes_for(Duration::from_millis(20)), 160);
    }

    #[test]
    fn unknown_identity_uses_placeholder_name() {
        let id = CallerIdentity::default();
        assert_eq!(id.name, UNKNOWN_CALLER);
        assert!(id.number.is_empty());
    }
}
