//! Provider configuration for the voice adapters.
//!
//! Each adapter receives its own immutable config value at construction;
//! nothing here reads the process environment.

use serde::{Deserialize, Serialize};
use std::fmt;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io/v1";

fn default_openai_url() -> String {
    OPENAI_API_URL.to_string()
}

fn default_elevenlabs_url() -> String {
    ELEVENLABS_API_URL.to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_whisper_binary() -> String {
    "whisper-cli".to_string()
}

fn default_stt_timeout_secs() -> u64 {
    60
}

/// 0.5 s of μ-law 8 kHz.
fn default_min_audio_bytes() -> usize {
    4000
}

fn default_elevenlabs_model() -> String {
    "eleven_flash_v2_5".to_string()
}

fn default_openai_tts_model() -> String {
    "gpt-4o-mini-tts".to_string()
}

fn default_openai_voice() -> String {
    "alloy".to_string()
}

fn default_tts_timeout_secs() -> u64 {
    60
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_conversion_timeout_secs() -> u64 {
    30
}

/// Which speech recognition backend to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProvider {
    /// OpenAI-compatible transcription API.
    #[default]
    Hosted,
    /// whisper.cpp-compatible binary on the local machine.
    Local,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub provider: SttProvider,
    #[serde(default = "default_openai_url")]
    pub api_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    /// ISO-639-1 hint passed to either backend.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_whisper_binary")]
    pub whisper_binary: String,
    /// GGML model for the local binary.
    #[serde(default)]
    pub model_path: String,
    #[serde(default = "default_stt_timeout_secs")]
    pub timeout_secs: u64,
    /// Audio shorter than this is never sent for recognition.
    #[serde(default = "default_min_audio_bytes")]
    pub min_audio_bytes: usize,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::default(),
            api_url: default_openai_url(),
            api_key: String::new(),
            model: default_stt_model(),
            language: None,
            whisper_binary: default_whisper_binary(),
            model_path: String::new(),
            timeout_secs: default_stt_timeout_secs(),
            min_audio_bytes: default_min_audio_bytes(),
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("whisper_binary", &self.whisper_binary)
            .field("model_path", &self.model_path)
            .field("timeout_secs", &self.timeout_secs)
            .field("min_audio_bytes", &self.min_audio_bytes)
            .finish()
    }
}

impl SttConfig {
    pub fn hosted_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_url.is_empty()
    }

    pub fn local_configured(&self) -> bool {
        !self.model_path.is_empty() && !self.whisper_binary.is_empty()
    }
}

/// Which speech synthesis backend to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsProvider {
    #[default]
    ElevenLabs,
    OpenAi,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub provider: TtsProvider,
    #[serde(default = "default_elevenlabs_url")]
    pub elevenlabs_api_url: String,
    #[serde(default, skip_serializing)]
    pub elevenlabs_api_key: String,
    /// Voice identity used for every reply.
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_elevenlabs_model")]
    pub model_id: String,
    #[serde(default = "default_openai_url")]
    pub openai_api_url: String,
    #[serde(default, skip_serializing)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_tts_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_voice")]
    pub openai_voice: String,
    /// Longest wait for the next chunk of synthesized audio.
    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::default(),
            elevenlabs_api_url: default_elevenlabs_url(),
            elevenlabs_api_key: String::new(),
            voice_id: String::new(),
            model_id: default_elevenlabs_model(),
            openai_api_url: default_openai_url(),
            openai_api_key: String::new(),
            openai_model: default_openai_tts_model(),
            openai_voice: default_openai_voice(),
            timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("provider", &self.provider)
            .field("elevenlabs_api_url", &self.elevenlabs_api_url)
            .field("elevenlabs_api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("openai_api_url", &self.openai_api_url)
            .field("openai_api_key", &"[REDACTED]")
            .field("openai_model", &self.openai_model)
            .field("openai_voice", &self.openai_voice)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl TtsConfig {
    pub fn elevenlabs_configured(&self) -> bool {
        !self.elevenlabs_api_key.is_empty() && !self.voice_id.is_empty()
    }

    pub fn openai_configured(&self) -> bool {
        !self.openai_api_key.is_empty()
    }
}

/// External agent command. The prompt is written to its stdin and the reply
/// read from its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Hard kill-timeout for one reply.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// Audio format conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    #[serde(default = "default_conversion_timeout_secs")]
    pub conversion_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: default_ffmpeg_binary(),
            conversion_timeout_secs: default_conversion_timeout_secs(),
        }
    }
}
