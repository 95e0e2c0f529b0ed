//! Voice adapters for the callbridge telephony pipeline.
//!
//! Wraps the external speech engines behind one interface per capability:
//! a [`Transcriber`] for recognition, a [`Synthesizer`] for speech output,
//! and an [`AgentBackend`] that turns a prompt into reply text. The
//! [`SttService`] and [`TtsService`] adapters sit on top of the providers
//! and apply the pipeline's policy: length floors, timeouts, playback
//! framing, and the rule that a failed engine call degrades to silence
//! rather than an error.
//!
//! Audio crosses this crate as carrier μ-law 8 kHz. The [`FormatBridge`]
//! handles conversion to and from what each engine expects.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod energy;
pub mod error;
pub mod stt;
pub mod tts;

pub use agent::{AgentBackend, CommandAgent};
pub use bridge::FormatBridge;
pub use config::{AgentConfig, MediaConfig, SttConfig, SttProvider, TtsConfig, TtsProvider};
pub use error::VoiceError;
pub use stt::{HostedWhisper, LocalWhisper, SpeechToText, SttService, Transcriber};
pub use tts::{
    interrupt_pair, ElevenLabs, Interrupt, InterruptHandle, OpenAiSpeech, PlaybackReport,
    Synthesizer, TtsService, PLAYBACK_FRAME_BYTES,
};

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;

/// A stream of audio bytes produced by an engine or the format bridge.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, VoiceError>> + Send>>;
