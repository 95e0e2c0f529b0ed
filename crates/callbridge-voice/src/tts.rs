use crate::bridge::FormatBridge;
use crate::config::{TtsConfig, TtsProvider};
use crate::error::VoiceError;
use crate::AudioStream;
use async_trait::async_trait;
use callbridge_types::{mulaw_bytes_for, OutboundFrame};
use futures_util::StreamExt;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum text input size for TTS (4 KiB). Longer replies are cut at a
/// character boundary; nobody wants to listen to more than that on a call.
const MAX_TTS_INPUT_BYTES: usize = 4 * 1024;

/// Bytes per outbound media frame: 20 ms of μ-law 8 kHz.
pub const PLAYBACK_FRAME_BYTES: usize = 160;

/// Sample rate of the PCM the OpenAI speech endpoint returns.
const OPENAI_PCM_SAMPLE_RATE: u32 = 24_000;

/// A speech engine that streams carrier μ-law 8 kHz audio for a text.
#[async_trait]
pub trait Synthesizer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn open_stream(&self, text: &str) -> Result<AudioStream, VoiceError>;
}

/// ElevenLabs streaming endpoint, which can emit `ulaw_8000` directly.
#[derive(Clone)]
pub struct ElevenLabs {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl fmt::Debug for ElevenLabs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabs")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .finish()
    }
}

impl ElevenLabs {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        voice_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for ElevenLabs {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn open_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let url = format!(
            "{}/text-to-speech/{}/stream?output_format=ulaw_8000",
            self.api_url.trim_end_matches('/'),
            self.voice_id
        );
        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&json!({ "text": text, "model_id": self.model_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "ElevenLabs returned {}: {}",
                status, body
            )));
        }

        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(VoiceError::from)),
        ))
    }
}

/// OpenAI `/audio/speech`. Returns 24 kHz PCM, re-encoded on the fly through
/// the format bridge.
#[derive(Clone)]
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    voice: String,
    bridge: FormatBridge,
}

impl fmt::Debug for OpenAiSpeech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiSpeech")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

impl OpenAiSpeech {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        bridge: FormatBridge,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            bridge,
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiSpeech {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn open_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let url = format!("{}/audio/speech", self.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
                "response_format": "pcm",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "OpenAI speech returned {}: {}",
                status, body
            )));
        }

        let pcm: AudioStream = Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(VoiceError::from)),
        );
        self.bridge.transcode_stream(pcm, OPENAI_PCM_SAMPLE_RATE)
    }
}

/// Picks the configured synthesis backend, falling back to whichever one is
/// actually configured.
pub fn select_synthesizer(
    config: &TtsConfig,
    bridge: &FormatBridge,
) -> Option<Arc<dyn Synthesizer>> {
    let elevenlabs = || -> Arc<dyn Synthesizer> {
        Arc::new(ElevenLabs::new(
            &config.elevenlabs_api_url,
            &config.elevenlabs_api_key,
            &config.voice_id,
            &config.model_id,
        ))
    };
    let openai = || -> Arc<dyn Synthesizer> {
        Arc::new(OpenAiSpeech::new(
            &config.openai_api_url,
            &config.openai_api_key,
            &config.openai_model,
            &config.openai_voice,
            bridge.clone(),
        ))
    };

    let selected = match config.provider {
        TtsProvider::ElevenLabs if config.elevenlabs_configured() => Some(elevenlabs()),
        TtsProvider::OpenAi if config.openai_configured() => Some(openai()),
        _ if config.elevenlabs_configured() => Some(elevenlabs()),
        _ if config.openai_configured() => Some(openai()),
        _ => None,
    };

    match &selected {
        Some(backend) => info!(
            requested = ?config.provider,
            using = backend.name(),
            "text-to-speech provider selected"
        ),
        None => warn!("no text-to-speech provider configured; replies will not be spoken"),
    }

    selected
}

/// Sending half of a barge-in signal.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<watch::Sender<bool>>);

impl InterruptHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of a barge-in signal, checked by playback between frames.
#[derive(Debug, Clone)]
pub struct Interrupt(watch::Receiver<bool>);

impl Interrupt {
    /// An interrupt that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn triggered(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                // Sender gone without triggering.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn interrupt_pair() -> (InterruptHandle, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle(Arc::new(tx)), Interrupt(rx))
}

/// What one streamed reply put on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub frames: usize,
    pub bytes: usize,
    /// Name of the completion mark, when one was sent.
    pub mark: Option<String>,
    pub interrupted: bool,
}

/// Service for generating speech from text.
#[derive(Debug, Clone)]
pub struct TtsService {
    backend: Option<Arc<dyn Synthesizer>>,
    stall_timeout: Duration,
}

impl TtsService {
    pub fn new(backend: Option<Arc<dyn Synthesizer>>, stall_timeout: Duration) -> Self {
        Self {
            backend,
            stall_timeout,
        }
    }

    pub fn from_config(config: &TtsConfig, bridge: &FormatBridge) -> Self {
        Self::new(
            select_synthesizer(config, bridge),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    async fn open(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            VoiceError::Config("no text-to-speech provider configured".to_string())
        })?;
        tokio::time::timeout(self.stall_timeout, backend.open_stream(text))
            .await
            .map_err(|_| VoiceError::Timeout("speech synthesis", self.stall_timeout.as_secs()))?
    }

    /// Synthesizes `text` and writes it to the call as playback frames.
    ///
    /// Emits `clear` before the first frame, fixed-size `media` frames, the
    /// remainder at end of stream, then one uniquely named `mark`. Nothing is
    /// sent if synthesis fails before producing audio. If `interrupt` fires,
    /// playback stops, a `clear` discards what the carrier has queued, and no
    /// mark follows.
    pub async fn stream_reply(
        &self,
        text: &str,
        stream_sid: &str,
        sink: &mpsc::Sender<OutboundFrame>,
        interrupt: &mut Interrupt,
    ) -> Result<PlaybackReport, VoiceError> {
        let mut report = PlaybackReport::default();
        let text = prepare_text(text);
        if text.is_empty() {
            return Ok(report);
        }

        let mut stream = self.open(text).await?;
        let mut pending: Vec<u8> = Vec::with_capacity(PLAYBACK_FRAME_BYTES * 8);
        let mut started = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = interrupt.triggered() => {
                    if started {
                        send(sink, OutboundFrame::clear(stream_sid)).await?;
                    }
                    report.interrupted = true;
                    info!(
                        stream_sid,
                        frames = report.frames,
                        "playback interrupted by caller"
                    );
                    return Ok(report);
                }
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(None) => break,
                Ok(Some(Err(e))) if !started => return Err(e),
                Err(_) if !started => {
                    return Err(VoiceError::Timeout(
                        "speech synthesis",
                        self.stall_timeout.as_secs(),
                    ))
                }
                Ok(Some(Err(e))) => {
                    warn!(stream_sid, "synthesis stream failed mid-reply: {}", e);
                    break;
                }
                Err(_) => {
                    warn!(stream_sid, "synthesis stream stalled mid-reply");
                    break;
                }
            };

            if chunk.is_empty() {
                continue;
            }
            if !started {
                send(sink, OutboundFrame::clear(stream_sid)).await?;
                started = true;
            }

            pending.extend_from_slice(&chunk);
            let whole = pending.len() - pending.len() % PLAYBACK_FRAME_BYTES;
            for frame in pending[..whole].chunks_exact(PLAYBACK_FRAME_BYTES) {
                send(sink, OutboundFrame::media(stream_sid, frame)).await?;
                report.frames += 1;
                report.bytes += frame.len();
            }
            pending.drain(..whole);
        }

        if !pending.is_empty() {
            send(sink, OutboundFrame::media(stream_sid, &pending)).await?;
            report.frames += 1;
            report.bytes += pending.len();
        }

        if started {
            let name = format!("reply-{}", Uuid::new_v4());
            send(sink, OutboundFrame::mark(stream_sid, name.clone())).await?;
            report.mark = Some(name);
        }

        debug!(
            stream_sid,
            frames = report.frames,
            bytes = report.bytes,
            "reply streamed"
        );
        Ok(report)
    }

    /// Synthesizes `text` into one μ-law buffer.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let text = prepare_text(text);
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut stream = self.open(text).await?;
        // Rough guess: speech runs near 15 characters per second.
        let estimate = mulaw_bytes_for(Duration::from_millis(text.len() as u64 * 66));
        let mut audio = Vec::with_capacity(estimate);
        loop {
            match tokio::time::timeout(self.stall_timeout, stream.next()).await {
                Ok(Some(chunk)) => audio.extend_from_slice(&chunk?),
                Ok(None) => break,
                Err(_) => {
                    return Err(VoiceError::Timeout(
                        "speech synthesis",
                        self.stall_timeout.as_secs(),
                    ))
                }
            }
        }
        Ok(audio)
    }
}

async fn send(sink: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) -> Result<(), VoiceError> {
    sink.send(frame)
        .await
        .map_err(|_| VoiceError::Tts("playback channel closed".to_string()))
}

/// Trims and caps text at a character boundary.
fn prepare_text(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= MAX_TTS_INPUT_BYTES {
        return text;
    }
    let mut end = MAX_TTS_INPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    warn!(
        bytes = text.len(),
        limit = MAX_TTS_INPUT_BYTES,
        "reply text truncated before synthesis"
    );
    &text[..end]
}
