#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use callbridge_server::config::Config;
use callbridge_server::orchestrator::{PromptSettings, VoicePipeline};
use callbridge_server::segmenter::SegmentationPolicy;
use callbridge_server::AppState;
use callbridge_types::{InboundFrame, OutboundFrame};
use callbridge_voice::{
    AgentBackend, AudioStream, SpeechToText, Synthesizer, TtsService, VoiceError,
};
use futures_util::stream;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const LOUD: u8 = 0x00;
pub const QUIET: u8 = 0xff;

/// Returns a fixed transcript and counts calls.
#[derive(Debug, Default)]
pub struct FakeStt {
    pub transcript: String,
    pub calls: AtomicUsize,
    pub bytes_seen: Mutex<Vec<usize>>,
}

impl FakeStt {
    pub fn saying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: text.to_string(),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, chunks: &[Bytes]) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total = chunks.iter().map(Bytes::len).sum();
        self.bytes_seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(total);
        self.transcript.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AgentMode {
    Reply,
    Timeout,
    Fail,
    /// Never answers; keeps the turn in flight.
    Hang,
}

/// Replies with a fixed text and records every prompt.
#[derive(Debug)]
pub struct FakeAgent {
    pub reply: String,
    pub mode: AgentMode,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn new(reply: &str, mode: AgentMode) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            mode,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(reply: &str) -> Arc<Self> {
        Self::new(reply, AgentMode::Reply)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl AgentBackend for FakeAgent {
    async fn reply(&self, prompt: &str) -> Result<String, VoiceError> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(prompt.to_string());
        match self.mode {
            AgentMode::Reply => Ok(self.reply.clone()),
            AgentMode::Timeout => Err(VoiceError::Timeout("agent backend", 120)),
            AgentMode::Fail => Err(VoiceError::Agent("exit status: 1".to_string())),
            AgentMode::Hang => std::future::pending().await,
        }
    }
}

/// Emits `chunks` μ-law chunks of `size` bytes each.
#[derive(Debug, Clone)]
pub struct FakeSynth {
    pub chunks: usize,
    pub size: usize,
}

#[async_trait]
impl Synthesizer for FakeSynth {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn open_stream(&self, _text: &str) -> Result<AudioStream, VoiceError> {
        let items: Vec<Result<Bytes, VoiceError>> = (0..self.chunks)
            .map(|_| Ok(Bytes::from(vec![0x7f; self.size])))
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

pub fn settings() -> PromptSettings {
    PromptSettings::from_config(&Config::default().conversation)
}

pub fn pipeline(stt: Arc<FakeStt>, agent: Arc<FakeAgent>) -> Arc<VoicePipeline> {
    let synth = FakeSynth {
        chunks: 2,
        size: 200,
    };
    let tts = TtsService::new(Some(Arc::new(synth)), Duration::from_secs(5));
    Arc::new(VoicePipeline::new(stt, tts, agent, settings()))
}

pub fn state_with(config: Config, stt: Arc<FakeStt>, agent: Arc<FakeAgent>) -> AppState {
    AppState::new(config, pipeline(stt, agent), SegmentationPolicy::default())
}

pub fn allowlisted_config() -> Config {
    let mut config = Config::default();
    config.callers.allowlist = vec!["+15551234567".to_string()];
    config
        .callers
        .names
        .insert("+15551234567".to_string(), "Ada".to_string());
    config
}

pub fn start_frame(stream_sid: &str) -> InboundFrame {
    frame(json!({
        "event": "start",
        "streamSid": stream_sid,
        "start": {
            "streamSid": stream_sid,
            "callSid": "CA123",
            "accountSid": "AC123",
            "customParameters": { "caller": "+15551234567", "callerName": "Ada" },
            "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
        }
    }))
}

pub fn media_frame(stream_sid: &str, byte: u8, len: usize) -> InboundFrame {
    frame(json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "track": "inbound", "payload": STANDARD.encode(vec![byte; len]) }
    }))
}

pub fn stop_frame() -> InboundFrame {
    frame(json!({ "event": "stop", "stop": { "callSid": "CA123" } }))
}

fn frame(value: serde_json::Value) -> InboundFrame {
    InboundFrame::parse(&value.to_string()).unwrap()
}

pub fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

pub fn events(frames: &[OutboundFrame]) -> Vec<&'static str> {
    frames.iter().map(OutboundFrame::event).collect()
}
