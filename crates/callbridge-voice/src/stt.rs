use crate::bridge::FormatBridge;
use crate::config::{SttConfig, SttProvider};
use crate::error::VoiceError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Turns buffered caller audio into text.
///
/// Implementations never fail: an empty string is the single signal for
/// "nothing usable was heard".
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, chunks: &[Bytes]) -> String;
}

/// A recognition engine that reads a 16 kHz mono WAV file.
#[async_trait]
pub trait Transcriber: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn transcribe_wav(&self, wav: &Path) -> Result<String, VoiceError>;
}

/// whisper.cpp-compatible binary.
#[derive(Debug, Clone)]
pub struct LocalWhisper {
    binary_path: PathBuf,
    model_path: PathBuf,
    language: Option<String>,
}

impl LocalWhisper {
    pub fn new(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

#[async_trait]
impl Transcriber for LocalWhisper {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn transcribe_wav(&self, wav: &Path) -> Result<String, VoiceError> {
        if !self.model_path.exists() {
            return Err(VoiceError::Config(format!(
                "Whisper model not found: {:?}",
                self.model_path
            )));
        }

        // -nt: no timestamps, -np: no progress/system prints. The
        // transcript is all that remains on stdout.
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(wav)
            .arg("-nt")
            .arg("-np");
        if let Some(language) = &self.language {
            command.arg("-l").arg(language);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Clone)]
pub struct HostedWhisper {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl fmt::Debug for HostedWhisper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedWhisper")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .finish()
    }
}

impl HostedWhisper {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

#[async_trait]
impl Transcriber for HostedWhisper {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn transcribe_wav(&self, wav: &Path) -> Result<String, VoiceError> {
        let audio = tokio::fs::read(wav).await?;
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let url = format!("{}/audio/transcriptions", self.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!(
                "transcription API returned {}: {}",
                status, body
            )));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text.trim().to_string())
    }
}

/// Picks the configured recognition backend, falling back to the other one
/// when the preferred backend is missing credentials or a model.
pub fn select_transcriber(config: &SttConfig) -> Option<Arc<dyn Transcriber>> {
    let hosted = || -> Arc<dyn Transcriber> {
        Arc::new(
            HostedWhisper::new(&config.api_url, &config.api_key, &config.model)
                .with_language(config.language.clone()),
        )
    };
    let local = || -> Arc<dyn Transcriber> {
        Arc::new(
            LocalWhisper::new(&config.whisper_binary, &config.model_path)
                .with_language(config.language.clone()),
        )
    };

    let selected = match config.provider {
        SttProvider::Hosted if config.hosted_configured() => Some(hosted()),
        SttProvider::Local if config.local_configured() => Some(local()),
        _ if config.hosted_configured() => Some(hosted()),
        _ if config.local_configured() => Some(local()),
        _ => None,
    };

    match &selected {
        Some(backend) if backend.name() != provider_name(config.provider) => warn!(
            requested = provider_name(config.provider),
            using = backend.name(),
            "requested speech-to-text provider is not configured; falling back"
        ),
        Some(backend) => info!(provider = backend.name(), "speech-to-text provider selected"),
        None => warn!("no speech-to-text provider configured; every utterance will be ignored"),
    }

    selected
}

fn provider_name(provider: SttProvider) -> &'static str {
    match provider {
        SttProvider::Hosted => "hosted",
        SttProvider::Local => "local",
    }
}

/// The speech-to-text adapter.
///
/// Concatenates the buffered chunks, stages them in a temp file, converts
/// them through the [`FormatBridge`], and hands the result to the selected
/// [`Transcriber`]. Both temp files are removed when they go out of scope,
/// whichever way the call ends.
#[derive(Debug, Clone)]
pub struct SttService {
    bridge: FormatBridge,
    backend: Option<Arc<dyn Transcriber>>,
    min_audio_bytes: usize,
    timeout: Duration,
}

impl SttService {
    pub fn new(
        bridge: FormatBridge,
        backend: Option<Arc<dyn Transcriber>>,
        min_audio_bytes: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            backend,
            min_audio_bytes,
            timeout,
        }
    }

    pub fn from_config(config: &SttConfig, bridge: FormatBridge) -> Self {
        Self::new(
            bridge,
            select_transcriber(config),
            config.min_audio_bytes,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Name of the backend in use, if any.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    async fn try_transcribe(&self, chunks: &[Bytes], total: usize) -> Result<String, VoiceError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            VoiceError::Config("no speech-to-text provider configured".to_string())
        })?;

        let mut audio = Vec::with_capacity(total);
        for chunk in chunks {
            audio.extend_from_slice(chunk);
        }

        let raw = tempfile::Builder::new()
            .prefix("callbridge-")
            .suffix(".ulaw")
            .tempfile()?;
        tokio::fs::write(raw.path(), &audio).await?;

        let wav = tempfile::Builder::new()
            .prefix("callbridge-")
            .suffix(".wav")
            .tempfile()?;
        self.bridge.mulaw_file_to_wav(raw.path(), wav.path()).await?;

        let text = tokio::time::timeout(self.timeout, backend.transcribe_wav(wav.path()))
            .await
            .map_err(|_| VoiceError::Timeout("speech recognition", self.timeout.as_secs()))??;

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl SpeechToText for SttService {
    async fn transcribe(&self, chunks: &[Bytes]) -> String {
        let total: usize = chunks.iter().map(Bytes::len).sum();
        if total < self.min_audio_bytes {
            debug!(
                bytes = total,
                min = self.min_audio_bytes,
                "audio below recognition floor; skipping"
            );
            return String::new();
        }
        if total > MAX_STT_INPUT_BYTES {
            warn!(
                bytes = total,
                limit = MAX_STT_INPUT_BYTES,
                "audio exceeds maximum recognition size; skipping"
            );
            return String::new();
        }

        match self.try_transcribe(chunks, total).await {
            Ok(text) => text,
            Err(VoiceError::Config(msg)) => {
                debug!("transcription skipped: {}", msg);
                String::new()
            }
            Err(e) => {
                warn!(bytes = total, "transcription failed: {}", e);
                String::new()
            }
        }
    }
}
