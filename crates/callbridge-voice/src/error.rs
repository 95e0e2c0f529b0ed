use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Format bridge error: {0}")]
    Bridge(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Agent backend error: {0}")]
    Agent(String),

    #[error("{0} timed out after {1} seconds")]
    Timeout(&'static str, u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl VoiceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(..))
    }
}
