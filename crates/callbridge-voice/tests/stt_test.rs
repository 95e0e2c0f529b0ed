#![cfg(unix)]

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use callbridge_voice::stt::select_transcriber;
use callbridge_voice::{
    FormatBridge, LocalWhisper, SpeechToText, SttConfig, SttProvider, SttService, Transcriber,
    VoiceError,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records what it was asked to transcribe. With the copying fake ffmpeg the
/// "wav" file holds the concatenated μ-law input unchanged.
#[derive(Debug, Default)]
struct RecordingTranscriber {
    seen: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    reply: String,
    fail: bool,
}

impl RecordingTranscriber {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transcriber for RecordingTranscriber {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn transcribe_wav(&self, wav: &Path) -> Result<String, VoiceError> {
        let contents = tokio::fs::read(wav).await?;
        self.seen
            .lock()
            .unwrap()
            .push((wav.to_path_buf(), contents));
        if self.fail {
            return Err(VoiceError::Stt("engine crashed".to_string()));
        }
        Ok(self.reply.clone())
    }
}

fn service(dir: &Path, backend: Arc<RecordingTranscriber>, min_bytes: usize) -> SttService {
    let bridge = FormatBridge::new(common::fake_ffmpeg(dir), Duration::from_secs(5));
    SttService::new(bridge, Some(backend), min_bytes, Duration::from_secs(5))
}

#[tokio::test]
async fn test_chunks_reach_backend_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(RecordingTranscriber::replying("  hello there  "));
    let stt = service(dir.path(), backend.clone(), 4);

    let chunks = vec![Bytes::from_static(b"AAAA"), Bytes::from_static(b"BBBB")];
    let text = stt.transcribe(&chunks).await;

    assert_eq!(text, "hello there");
    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, b"AAAABBBB".to_vec());
}

#[tokio::test]
async fn test_temp_files_removed_after_success_and_failure() {
    let dir = tempfile::tempdir().unwrap();

    let ok_backend = Arc::new(RecordingTranscriber::replying("fine"));
    let stt = service(dir.path(), ok_backend.clone(), 1);
    assert_eq!(stt.transcribe(&[Bytes::from_static(b"xyz")]).await, "fine");
    let ok_path = ok_backend.seen.lock().unwrap()[0].0.clone();
    assert!(!ok_path.exists(), "wav temp file left behind: {:?}", ok_path);

    let bad_backend = Arc::new(RecordingTranscriber::failing());
    let stt = service(dir.path(), bad_backend.clone(), 1);
    assert_eq!(stt.transcribe(&[Bytes::from_static(b"xyz")]).await, "");
    let bad_path = bad_backend.seen.lock().unwrap()[0].0.clone();
    assert!(!bad_path.exists(), "wav temp file left behind: {:?}", bad_path);
}

#[tokio::test]
async fn test_audio_below_floor_is_never_sent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(RecordingTranscriber::replying("should not appear"));
    let stt = service(dir.path(), backend.clone(), 4000);

    let short = vec![Bytes::from(vec![0u8; 2400])];
    assert_eq!(stt.transcribe(&short).await, "");
    assert!(backend.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_backend_yields_empty() {
    let bridge = FormatBridge::new("ffmpeg", Duration::from_secs(5));
    let stt = SttService::new(bridge, None, 1, Duration::from_secs(5));
    assert_eq!(stt.backend_name(), None);
    assert_eq!(stt.transcribe(&[Bytes::from_static(b"abcd")]).await, "");
}

#[tokio::test]
async fn test_converter_failure_yields_empty() {
    let dir = tempfile::tempdir().unwrap();
    let broken = common::write_script(dir.path(), "ffmpeg", "echo 'bad input' >&2\nexit 1");
    let backend = Arc::new(RecordingTranscriber::replying("unused"));
    let stt = SttService::new(
        FormatBridge::new(broken, Duration::from_secs(5)),
        Some(backend.clone()),
        1,
        Duration::from_secs(5),
    );

    assert_eq!(stt.transcribe(&[Bytes::from_static(b"abcd")]).await, "");
    assert!(backend.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_local_whisper_reads_transcript_from_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("ggml-base.en.bin");
    std::fs::File::create(&model).unwrap();
    let whisper = common::write_script(
        dir.path(),
        "whisper-cli",
        "echo ''\necho '  What time is it'\necho '  in Lisbon?'",
    );
    let wav = dir.path().join("in.wav");
    std::fs::write(&wav, b"RIFF").unwrap();

    let local = LocalWhisper::new(whisper, &model);
    let text = local.transcribe_wav(&wav).await.unwrap();
    assert_eq!(text, "What time is it in Lisbon?");
}

#[tokio::test]
async fn test_local_whisper_missing_model() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalWhisper::new("whisper-cli", dir.path().join("missing.bin"));

    match local.transcribe_wav(&dir.path().join("in.wav")).await {
        Err(VoiceError::Config(msg)) => assert!(msg.contains("model not found")),
        other => panic!("Expected Config error about missing model, got {:?}", other),
    }
}

#[tokio::test]
async fn test_local_whisper_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.bin");
    std::fs::File::create(&model).unwrap();
    let whisper = common::write_script(dir.path(), "whisper-cli", "echo 'no audio' >&2\nexit 2");

    let result = LocalWhisper::new(whisper, &model)
        .transcribe_wav(&dir.path().join("in.wav"))
        .await;
    assert!(matches!(result, Err(VoiceError::Stt(_))), "got {:?}", result);
}

#[test]
fn test_selection_prefers_requested_provider() {
    let config = SttConfig {
        provider: SttProvider::Local,
        api_key: "sk-test".to_string(),
        model_path: "/models/ggml-base.bin".to_string(),
        ..Default::default()
    };
    assert_eq!(select_transcriber(&config).unwrap().name(), "local");
}

#[test]
fn test_selection_falls_back_to_configured_provider() {
    let hosted_only = SttConfig {
        provider: SttProvider::Local,
        api_key: "sk-test".to_string(),
        ..Default::default()
    };
    assert_eq!(select_transcriber(&hosted_only).unwrap().name(), "hosted");

    let local_only = SttConfig {
        provider: SttProvider::Hosted,
        model_path: "/models/ggml-base.bin".to_string(),
        ..Default::default()
    };
    assert_eq!(select_transcriber(&local_only).unwrap().name(), "local");

    assert!(select_transcriber(&SttConfig::default()).is_none());
}

#[test]
fn test_stt_config_from_toml_and_redaction() {
    let config: SttConfig = toml::from_str(
        r#"
        provider = "local"
        model_path = "/models/ggml-small.bin"
        api_key = "sk-secret"
        language = "en"
    "#,
    )
    .expect("parse TOML");

    assert_eq!(config.provider, SttProvider::Local);
    assert_eq!(config.whisper_binary, "whisper-cli");
    assert_eq!(config.min_audio_bytes, 4000);
    assert_eq!(config.language.as_deref(), Some("en"));
    let debug = format!("{:?}", config);
    assert!(!debug.contains("sk-secret"));
    assert!(debug.contains("[REDACTED]"));
}
