//! Turn orchestration: transcribe, ask the agent, speak the reply.

use crate::config::ConversationConfig;
use bytes::Bytes;
use callbridge_types::{CallerIdentity, ConversationTurn, OutboundFrame};
use callbridge_voice::{AgentBackend, Interrupt, PlaybackReport, SpeechToText, TtsService};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transcripts shorter than this (in characters) are treated as noise.
const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Text that frames every prompt.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub preamble: String,
    pub apology: String,
    pub history_window: usize,
}

impl PromptSettings {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self {
            preamble: config.preamble.clone(),
            apology: config.apology.clone(),
            history_window: config.history_window,
        }
    }
}

/// Everything one turn needs from its session.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub identity: CallerIdentity,
    pub stream_sid: String,
    /// History as of the start of the turn, oldest first.
    pub history: Vec<ConversationTurn>,
    pub utterance: Vec<Bytes>,
}

/// What a turn adds to its session.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// New history entries, in order.
    pub turns: Vec<ConversationTurn>,
    pub playback: Option<PlaybackReport>,
}

/// The three capabilities a call talks to, shared by every session.
pub struct VoicePipeline {
    stt: Arc<dyn SpeechToText>,
    tts: TtsService,
    agent: Arc<dyn AgentBackend>,
    settings: PromptSettings,
}

impl VoicePipeline {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        tts: TtsService,
        agent: Arc<dyn AgentBackend>,
        settings: PromptSettings,
    ) -> Self {
        Self {
            stt,
            tts,
            agent,
            settings,
        }
    }

    pub fn settings(&self) -> &PromptSettings {
        &self.settings
    }

    /// Runs one turn. Never fails: each stage degrades to silence, except an
    /// agent timeout, which is answered with the apology.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        sink: &mpsc::Sender<OutboundFrame>,
        interrupt: &mut Interrupt,
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();
        let stream_sid = request.stream_sid.as_str();

        let started = Instant::now();
        let transcript = self.stt.transcribe(&request.utterance).await;
        let transcript = transcript.trim();
        if transcript.chars().count() < MIN_TRANSCRIPT_CHARS {
            debug!(
                stream_sid,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "nothing usable heard; no reply"
            );
            return outcome;
        }
        info!(
            stream_sid,
            caller = %request.identity.number,
            chars = transcript.len(),
            stt_ms = started.elapsed().as_millis() as u64,
            "caller utterance transcribed"
        );
        outcome.turns.push(ConversationTurn::caller(transcript));

        let window = window_of(&request.history, self.settings.history_window);
        let prompt = build_prompt(
            &self.settings.preamble,
            &request.identity.name,
            Local::now(),
            window,
            transcript,
        );

        let agent_started = Instant::now();
        let reply = match self.agent.reply(&prompt).await {
            Ok(text) => strip_control_markers(&text),
            Err(e) if e.is_timeout() => {
                warn!(stream_sid, "agent backend timed out; apologizing: {}", e);
                self.settings.apology.clone()
            }
            Err(e) => {
                warn!(stream_sid, "agent backend failed: {}", e);
                String::new()
            }
        };
        debug!(
            stream_sid,
            agent_ms = agent_started.elapsed().as_millis() as u64,
            "agent reply received"
        );
        if reply.is_empty() {
            return outcome;
        }
        outcome.turns.push(ConversationTurn::assistant(reply.as_str()));

        match self.tts.stream_reply(&reply, stream_sid, sink, interrupt).await {
            Ok(report) => {
                info!(
                    stream_sid,
                    frames = report.frames,
                    bytes = report.bytes,
                    interrupted = report.interrupted,
                    turn_ms = started.elapsed().as_millis() as u64,
                    "reply played"
                );
                outcome.playback = Some(report);
            }
            Err(e) => warn!(stream_sid, "reply synthesis failed: {}", e),
        }
        outcome
    }
}

fn window_of(history: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(n)..]
}

/// Renders the prompt handed to the agent backend.
pub fn build_prompt(
    preamble: &str,
    caller_name: &str,
    now: DateTime<Local>,
    history: &[ConversationTurn],
    utterance: &str,
) -> String {
    let mut prompt = String::with_capacity(preamble.len() + utterance.len() + 256);
    let _ = writeln!(prompt, "{}", preamble.trim());
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Caller: {}", caller_name);
    let _ = writeln!(
        prompt,
        "Local time: {}",
        now.format("%A, %B %-d, %Y %-I:%M %p")
    );
    if !history.is_empty() {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Conversation so far:");
        for turn in history {
            let _ = writeln!(prompt, "{}: {}", turn.role.label(), turn.text);
        }
    }
    let _ = writeln!(prompt);
    let _ = write!(prompt, "The caller just said: {}", utterance);
    prompt
}

/// Removes text that must not be read aloud: `[[directives]]`, `<tags>`,
/// and markdown emphasis, headings, and code marks.
pub fn strip_control_markers(reply: &str) -> String {
    let mut out = String::with_capacity(reply.len());
    let mut rest = reply;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("[[") {
            if let Some(end) = rest[2..].find("]]") {
                rest = &rest[end + 4..];
                out.push(' ');
                continue;
            }
        } else if c == '<' && starts_tag(&rest[1..]) {
            if let Some(end) = rest.find('>') {
                rest = &rest[end + 1..];
                out.push(' ');
                continue;
            }
        }
        if !matches!(c, '*' | '_' | '#' | '`') {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn starts_tag(after_bracket: &str) -> bool {
    after_bracket
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
}
