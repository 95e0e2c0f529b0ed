use async_trait::async_trait;
use bytes::Bytes;
use callbridge_types::OutboundFrame;
use callbridge_voice::tts::select_synthesizer;
use callbridge_voice::{
    interrupt_pair, AudioStream, FormatBridge, Interrupt, Synthesizer, TtsConfig, TtsProvider,
    TtsService, VoiceError, PLAYBACK_FRAME_BYTES,
};
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Yields pre-baked μ-law chunks, optionally failing after them.
#[derive(Debug, Clone)]
struct ScriptedSynth {
    chunks: Vec<Vec<u8>>,
    fail_after: bool,
    hang_after: bool,
    refuse: bool,
}

impl ScriptedSynth {
    fn with_sizes(sizes: &[usize]) -> Self {
        Self {
            chunks: sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| vec![i as u8; n])
                .collect(),
            fail_after: false,
            hang_after: false,
            refuse: false,
        }
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynth {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open_stream(&self, _text: &str) -> Result<AudioStream, VoiceError> {
        if self.refuse {
            return Err(VoiceError::Tts("401 Unauthorized".to_string()));
        }
        let mut items: Vec<Result<Bytes, VoiceError>> = self
            .chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.clone())))
            .collect();
        if self.fail_after {
            items.push(Err(VoiceError::Tts("connection reset".to_string())));
        }
        if self.hang_after {
            return Ok(Box::pin(stream::iter(items).chain(stream::pending())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

fn tts(synth: ScriptedSynth) -> TtsService {
    TtsService::new(Some(Arc::new(synth)), Duration::from_secs(5))
}

fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_stream_reply_frames_audio_between_clear_and_mark() {
    let (tx, mut rx) = mpsc::channel(1024);
    let service = tts(ScriptedSynth::with_sizes(&[100, 250, 53]));

    let report = service
        .stream_reply("Hello caller", "MZ1", &tx, &mut Interrupt::never())
        .await
        .unwrap();

    let frames = drain(&mut rx);
    let total: usize = 100 + 250 + 53;

    assert_eq!(frames.first().map(OutboundFrame::event), Some("clear"));
    assert_eq!(frames.last().map(OutboundFrame::event), Some("mark"));
    assert_eq!(frames.iter().filter(|f| f.event() == "clear").count(), 1);
    assert_eq!(frames.iter().filter(|f| f.event() == "mark").count(), 1);

    let media: Vec<Vec<u8>> = frames.iter().filter_map(OutboundFrame::audio).collect();
    assert_eq!(media.iter().map(Vec::len).sum::<usize>(), total);
    // Every frame but the flushed remainder is exactly one playback frame.
    for frame in &media[..media.len() - 1] {
        assert_eq!(frame.len(), PLAYBACK_FRAME_BYTES);
    }
    assert_eq!(media.last().unwrap().len(), total % PLAYBACK_FRAME_BYTES);

    // Order is preserved across chunk boundaries.
    let flat: Vec<u8> = media.concat();
    let mut expected = vec![0u8; 100];
    expected.extend(vec![1u8; 250]);
    expected.extend(vec![2u8; 53]);
    assert_eq!(flat, expected);

    assert_eq!(report.bytes, total);
    assert_eq!(report.frames, media.len());
    assert!(!report.interrupted);
    match frames.last().unwrap() {
        OutboundFrame::Mark { mark, stream_sid } => {
            assert_eq!(stream_sid, "MZ1");
            assert!(mark.name.starts_with("reply-"));
            assert_eq!(Some(&mark.name), report.mark.as_ref());
        }
        other => panic!("expected mark, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exact_multiple_has_no_remainder_frame() {
    let (tx, mut rx) = mpsc::channel(1024);
    let service = tts(ScriptedSynth::with_sizes(&[PLAYBACK_FRAME_BYTES * 3]));

    let report = service
        .stream_reply("Hi", "MZ1", &tx, &mut Interrupt::never())
        .await
        .unwrap();

    let frames = drain(&mut rx);
    assert_eq!(report.frames, 3);
    assert_eq!(frames.len(), 5);
}

#[tokio::test]
async fn test_marks_are_unique_per_reply() {
    let (tx, _rx) = mpsc::channel(1024);
    let service = tts(ScriptedSynth::with_sizes(&[200]));

    let a = service
        .stream_reply("one", "MZ1", &tx, &mut Interrupt::never())
        .await
        .unwrap();
    let b = service
        .stream_reply("two", "MZ1", &tx, &mut Interrupt::never())
        .await
        .unwrap();
    assert_ne!(a.mark, b.mark);
}

#[tokio::test]
async fn test_refused_synthesis_sends_nothing() {
    let (tx, mut rx) = mpsc::channel(16);
    let mut synth = ScriptedSynth::with_sizes(&[200]);
    synth.refuse = true;

    let result = tts(synth)
        .stream_reply("Hello", "MZ1", &tx, &mut Interrupt::never())
        .await;
    assert!(matches!(result, Err(VoiceError::Tts(_))));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_mid_stream_failure_still_closes_with_mark() {
    let (tx, mut rx) = mpsc::channel(1024);
    let mut synth = ScriptedSynth::with_sizes(&[400]);
    synth.fail_after = true;

    let report = tts(synth)
        .stream_reply("Hello", "MZ1", &tx, &mut Interrupt::never())
        .await
        .unwrap();
    assert_eq!(report.bytes, 400);
    assert_eq!(drain(&mut rx).last().map(OutboundFrame::event), Some("mark"));
}

#[tokio::test]
async fn test_empty_text_and_missing_backend() {
    let (tx, mut rx) = mpsc::channel(16);

    let report = tts(ScriptedSynth::with_sizes(&[200]))
        .stream_reply("   ", "MZ1", &tx, &mut Interrupt::never())
        .await
        .unwrap();
    assert_eq!(report, Default::default());

    let unconfigured = TtsService::new(None, Duration::from_secs(5));
    let result = unconfigured
        .stream_reply("Hello", "MZ1", &tx, &mut Interrupt::never())
        .await;
    assert!(matches!(result, Err(VoiceError::Config(_))));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_interrupt_before_audio_sends_nothing() {
    let (tx, mut rx) = mpsc::channel(1024);
    let (handle, mut interrupt) = interrupt_pair();
    handle.trigger();

    let report = tts(ScriptedSynth::with_sizes(&[400]))
        .stream_reply("Hello", "MZ1", &tx, &mut interrupt)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.mark, None);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_barge_in_mid_reply_clears_queued_audio() {
    let (tx, mut rx) = mpsc::channel(1024);
    let (handle, mut interrupt) = interrupt_pair();
    let mut synth = ScriptedSynth::with_sizes(&[PLAYBACK_FRAME_BYTES * 2]);
    synth.hang_after = true;
    let service = tts(synth);

    let playback = tokio::spawn(async move {
        service
            .stream_reply("Long answer", "MZ1", &tx, &mut interrupt)
            .await
    });

    assert_eq!(rx.recv().await.map(|f| f.event()), Some("clear"));
    assert_eq!(rx.recv().await.map(|f| f.event()), Some("media"));
    assert_eq!(rx.recv().await.map(|f| f.event()), Some("media"));
    handle.trigger();

    let report = playback.await.unwrap().unwrap();
    assert!(report.interrupted);
    assert_eq!(report.frames, 2);
    assert_eq!(report.mark, None);
    let rest = drain(&mut rx);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].event(), "clear");
}

#[tokio::test]
async fn test_batch_synthesis_returns_whole_buffer() {
    let audio = tts(ScriptedSynth::with_sizes(&[10, 20, 30]))
        .synthesize("Read this back")
        .await
        .unwrap();
    assert_eq!(audio.len(), 60);
    assert_eq!(&audio[..10], &[0u8; 10]);
    assert_eq!(&audio[30..], &[2u8; 30]);
}

#[test]
fn test_synthesizer_selection_falls_back() {
    let bridge = FormatBridge::new("ffmpeg", Duration::from_secs(5));

    let openai_only = TtsConfig {
        provider: TtsProvider::ElevenLabs,
        openai_api_key: "sk-test".to_string(),
        ..Default::default()
    };
    assert_eq!(select_synthesizer(&openai_only, &bridge).unwrap().name(), "openai");

    let both = TtsConfig {
        provider: TtsProvider::ElevenLabs,
        openai_api_key: "sk-test".to_string(),
        elevenlabs_api_key: "xi-test".to_string(),
        voice_id: "voice-1".to_string(),
        ..Default::default()
    };
    assert_eq!(select_synthesizer(&both, &bridge).unwrap().name(), "elevenlabs");

    // An ElevenLabs key without a voice identity is not usable.
    let no_voice = TtsConfig {
        elevenlabs_api_key: "xi-test".to_string(),
        ..Default::default()
    };
    assert!(select_synthesizer(&no_voice, &bridge).is_none());
}

#[test]
fn test_tts_config_toml_defaults() {
    let config: TtsConfig = toml::from_str(
        r#"
        provider = "open_ai"
        openai_api_key = "sk-secret"
    "#,
    )
    .expect("parse TOML");
    assert_eq!(config.provider, TtsProvider::OpenAi);
    assert_eq!(config.openai_voice, "alloy");
    assert_eq!(config.timeout_secs, 60);
    assert!(!format!("{:?}", config).contains("sk-secret"));
}
