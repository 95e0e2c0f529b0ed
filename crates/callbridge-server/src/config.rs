//! Server configuration loading from file and environment variables.

use callbridge_voice::{AgentConfig, MediaConfig, SttConfig, TtsConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Carrier REST credentials and numbers.
    #[serde(default)]
    pub twilio: TwilioConfig,

    /// Caller allow-list and display names.
    #[serde(default)]
    pub callers: CallersConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub media: MediaConfig,

    /// Spoken text and history limits.
    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub outbound: OutboundConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (e.g. `https://calls.example.com`).
    /// Required for outbound calls; inbound calls fall back to the `Host`
    /// header when it is unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Clone, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Number outbound calls are placed from.
    #[serde(default)]
    pub phone_number: String,
    /// Destination used when an outbound request names none.
    #[serde(default)]
    pub default_to: Option<String>,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("phone_number", &self.phone_number)
            .field("default_to", &self.default_to)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TwilioConfig {
    pub fn configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty() && !self.phone_number.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallersConfig {
    /// Numbers allowed to reach the pipeline. Empty admits everyone.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Number → display name.
    #[serde(default)]
    pub names: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Spoken before the media socket opens.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Spoken to callers the gate turns away.
    #[serde(default = "default_rejection")]
    pub rejection: String,
    /// Instruction preamble at the top of every prompt.
    #[serde(default = "default_preamble")]
    pub preamble: String,
    /// Spoken when the agent backend times out.
    #[serde(default = "default_apology")]
    pub apology: String,
    /// Turns kept per call.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Turns included in each prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Stop playback when the caller starts talking over it.
    #[serde(default)]
    pub barge_in: bool,
}

#[derive(Clone, Default, Deserialize)]
pub struct OutboundConfig {
    /// Bearer token for `POST /api/calls`. The endpoint refuses every
    /// request while this is unset.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl fmt::Debug for OutboundConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_greeting() -> String {
    "Hi, you're connected. Go ahead whenever you're ready.".to_string()
}

fn default_rejection() -> String {
    "Sorry, this line is not accepting calls from your number. Goodbye.".to_string()
}

fn default_preamble() -> String {
    "You are a voice assistant answering a phone call. Your reply will be \
     spoken aloud, so keep it short and conversational. Do not use markdown, \
     lists, or emoji."
        .to_string()
}

fn default_apology() -> String {
    "Sorry, that took too long. Could you say that again?".to_string()
}

fn default_history_limit() -> usize {
    20
}

fn default_history_window() -> usize {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            phone_number: String::new(),
            default_to: None,
            api_base: default_twilio_api_base(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            rejection: default_rejection(),
            preamble: default_preamble(),
            apology: default_apology(),
            history_limit: default_history_limit(),
            history_window: default_history_window(),
            barge_in: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Environment variable overrides:
/// - `CALLBRIDGE_HOST` overrides `server.host`
/// - `CALLBRIDGE_PORT` overrides `server.port`
/// - `CALLBRIDGE_PUBLIC_URL` overrides `server.public_url`
/// - `CALLBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CALLBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_PHONE_NUMBER`
/// - `CALLBRIDGE_ALLOWED_CALLERS` replaces `callers.allowlist` (comma-separated)
/// - `OPENAI_API_KEY` fills `stt.api_key` and `tts.openai_api_key` when unset
/// - `ELEVENLABS_API_KEY` overrides `tts.elevenlabs_api_key`
/// - `CALLBRIDGE_API_TOKEN` overrides `outbound.api_token`
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("CALLBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CALLBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = var("CALLBRIDGE_PUBLIC_URL") {
        config.server.public_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(level) = var("CALLBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALLBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let Some(sid) = var("TWILIO_ACCOUNT_SID") {
        config.twilio.account_sid = sid;
    }
    if let Some(token) = var("TWILIO_AUTH_TOKEN") {
        config.twilio.auth_token = token;
    }
    if let Some(number) = var("TWILIO_PHONE_NUMBER") {
        config.twilio.phone_number = number;
    }
    if let Some(list) = var("CALLBRIDGE_ALLOWED_CALLERS") {
        config.callers.allowlist = list
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some(key) = var("OPENAI_API_KEY") {
        if config.stt.api_key.is_empty() {
            config.stt.api_key = key.clone();
        }
        if config.tts.openai_api_key.is_empty() {
            config.tts.openai_api_key = key;
        }
    }
    if let Some(key) = var("ELEVENLABS_API_KEY") {
        config.tts.elevenlabs_api_key = key;
    }
    if let Some(token) = var("CALLBRIDGE_API_TOKEN") {
        config.outbound.api_token = Some(token).filter(|t| !t.is_empty());
    }
}
