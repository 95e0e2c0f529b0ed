//! Media-stream WebSocket gateway.
//!
//! One task per socket owns the call's [`CallSession`] and multiplexes three
//! event sources: inbound carrier frames, the segmenter's silence deadline,
//! and the in-flight turn. Outbound frames go through a bounded channel to a
//! writer task, so playback applies backpressure instead of dropping audio.

use crate::gate::GateDecision;
use crate::orchestrator::{TurnOutcome, TurnRequest, VoicePipeline};
use crate::segmenter::{ChunkAction, Segment, SegmentationPolicy, Segmenter};
use crate::session::CallSession;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use callbridge_types::media::{MediaPayload, StartMetadata};
use callbridge_types::{CallerIdentity, InboundFrame, OutboundFrame, UNKNOWN_CALLER};
use callbridge_voice::{interrupt_pair, Interrupt, InterruptHandle};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Outbound frames buffered per call before playback waits on the socket.
const OUTBOUND_QUEUE: usize = 256;

/// Query parameters on the socket URL.
#[derive(Debug, Default, Deserialize)]
pub struct MediaParams {
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Handler for `GET /media`.
///
/// Re-checks the caller against the gate before upgrading, so knowing the
/// socket URL is not enough to reach the pipeline.
pub async fn media_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<MediaParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match admit(&state, &params) {
        Some(identity) => identity,
        None => {
            warn!(
                caller = params.caller.as_deref().unwrap_or(""),
                "media socket refused: caller not admitted"
            );
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    debug!(caller = %identity.number, "media socket upgrade accepted");
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

fn admit(state: &AppState, params: &MediaParams) -> Option<CallerIdentity> {
    if let Some(token) = params.token.as_deref() {
        return state.admissions.redeem(token);
    }
    let caller = params.caller.as_deref().unwrap_or("");
    if caller.is_empty() && !state.gate.is_open() {
        warn!(
            "media socket carries no caller number while the allow-list is closed; \
             check that the carrier preserves the stream URL query string"
        );
    }
    match state.gate.check(caller) {
        GateDecision::Allow(mut identity) => {
            // The table wins; the URL name only fills a gap.
            if identity.name == UNKNOWN_CALLER {
                if let Some(name) = params.name.as_deref().filter(|n| !n.is_empty()) {
                    identity.name = name.to_string();
                }
            }
            Some(identity)
        }
        GateDecision::Deny => None,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: CallerIdentity) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let conversation = &state.config.conversation;
    let mut call = MediaSession::new(
        identity,
        state.pipeline.clone(),
        state.policy,
        conversation.history_limit,
        conversation.barge_in,
        tx,
    );
    info!(caller = %call.session().identity.number, "media socket connected");

    loop {
        let deadline = call.segmenter().deadline();
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => call.handle_frame(frame, Instant::now()),
                    Err(e) => debug!("skipping unparsable media frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("media socket error: {}", e);
                    break;
                }
            },
            () = sleep_until(deadline) => call.on_deadline(Instant::now()),
            result = call.join_turn() => call.finish_turn(result, Instant::now()),
        }
    }

    call.shutdown();
    drop(call);
    send_task.abort();
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The state machine behind one media socket.
///
/// Driven by the socket task; exposed so the segmentation and turn-taking
/// rules can be exercised without a socket.
pub struct MediaSession {
    session: CallSession,
    segmenter: Segmenter,
    pipeline: Arc<VoicePipeline>,
    outbound: mpsc::Sender<OutboundFrame>,
    turn: Option<JoinHandle<TurnOutcome>>,
    barge_in: bool,
    interrupt: Option<InterruptHandle>,
    /// Consecutive voiced bytes heard while a turn is in flight.
    voiced_run: usize,
    /// Whether the caller spoke at all while the turn was in flight.
    voiced_during_turn: bool,
    stopped: bool,
}

impl MediaSession {
    pub fn new(
        identity: CallerIdentity,
        pipeline: Arc<VoicePipeline>,
        policy: SegmentationPolicy,
        history_limit: usize,
        barge_in: bool,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            session: CallSession::new(identity, history_limit),
            segmenter: Segmenter::new(policy),
            pipeline,
            outbound,
            turn: None,
            barge_in,
            interrupt: None,
            voiced_run: 0,
            voiced_during_turn: false,
            stopped: false,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    pub fn turn_in_flight(&self) -> bool {
        self.turn.is_some()
    }

    pub fn handle_frame(&mut self, frame: InboundFrame, now: Instant) {
        match frame {
            InboundFrame::Connected { protocol, version } => {
                debug!(?protocol, ?version, "media stream connected");
            }
            InboundFrame::Start { stream_sid, start } => self.on_start(stream_sid, start),
            InboundFrame::Media { media, .. } => self.on_media(&media, now),
            InboundFrame::Mark { mark } => {
                debug!(
                    stream_sid = self.session.stream_sid.as_deref().unwrap_or(""),
                    mark = %mark.name,
                    "playback reached mark"
                );
            }
            InboundFrame::Stop { stop } => {
                self.segmenter.cancel();
                self.stopped = true;
                info!(
                    stream_sid = self.session.stream_sid.as_deref().unwrap_or(""),
                    call_sid = stop.and_then(|s| s.call_sid).as_deref().unwrap_or(""),
                    turns = self.session.history.len(),
                    "media stream stopped"
                );
            }
        }
    }

    fn on_start(&mut self, stream_sid: Option<String>, start: StartMetadata) {
        let stream_sid = stream_sid.or(start.stream_sid);
        if stream_sid.is_none() {
            warn!("start frame without a stream sid; audio will be ignored");
        }
        self.session.stream_sid = stream_sid;
        self.session.call_sid = start.call_sid;

        let params = &start.custom_parameters;
        if self.session.identity.number.is_empty() {
            if let Some(caller) = params.get("caller") {
                self.session.identity.number = caller.clone();
            }
        }
        if let Some(name) = params.get("callerName").filter(|n| !n.is_empty()) {
            if self.session.identity.name == UNKNOWN_CALLER {
                self.session.identity.name = name.clone();
            }
        }

        info!(
            stream_sid = self.session.stream_sid.as_deref().unwrap_or(""),
            call_sid = self.session.call_sid.as_deref().unwrap_or(""),
            caller = %self.session.identity.number,
            "media stream started"
        );
    }

    fn on_media(&mut self, media: &MediaPayload, now: Instant) {
        if !self.session.is_started() || self.stopped {
            trace!("media before start or after stop; ignored");
            return;
        }
        let chunk = match media.decode() {
            Ok(audio) => Bytes::from(audio),
            Err(e) => {
                debug!("skipping media frame with bad payload: {}", e);
                return;
            }
        };

        let len = chunk.len();
        let action = self.segmenter.accept(&mut self.session, chunk, now);
        trace!(bytes = len, ?action, "media chunk");

        if self.turn.is_some() {
            if action == ChunkAction::AppendAndRearm {
                self.voiced_during_turn = true;
                self.voiced_run += len;
            } else {
                self.voiced_run = 0;
            }
            self.check_barge_in();
        }
    }

    fn check_barge_in(&mut self) {
        if self.voiced_run < self.segmenter.policy().barge_in_bytes() {
            return;
        }
        if let Some(handle) = self.interrupt.take() {
            info!(
                stream_sid = self.session.stream_sid.as_deref().unwrap_or(""),
                "caller spoke over the reply; interrupting playback"
            );
            handle.trigger();
        }
    }

    /// Called when the silence deadline may have passed.
    pub fn on_deadline(&mut self, now: Instant) {
        if !self.segmenter.take_if_due(now) {
            return;
        }
        let stream_sid = self.session.stream_sid.clone().unwrap_or_default();
        match self.segmenter.segment(&mut self.session) {
            Segment::Busy => debug!(
                stream_sid = %stream_sid,
                bytes = self.session.buffered_bytes(),
                "turn in flight; holding audio for the next window"
            ),
            Segment::Empty => {}
            Segment::Discarded { bytes } => debug!(
                stream_sid = %stream_sid,
                bytes,
                "utterance below minimum duration; discarded"
            ),
            Segment::Ready(utterance) => self.start_turn(stream_sid, utterance),
        }
    }

    fn start_turn(&mut self, stream_sid: String, utterance: Vec<Bytes>) {
        let bytes: usize = utterance.iter().map(Bytes::len).sum();
        debug!(stream_sid = %stream_sid, bytes, "utterance complete; starting turn");

        let window = self.pipeline.settings().history_window;
        let request = TurnRequest {
            identity: self.session.identity.clone(),
            stream_sid,
            history: self.session.history.window(window),
            utterance,
        };

        let mut interrupt = if self.barge_in {
            let (handle, interrupt) = interrupt_pair();
            self.interrupt = Some(handle);
            interrupt
        } else {
            Interrupt::never()
        };
        self.voiced_run = 0;
        self.voiced_during_turn = false;
        self.session.processing = true;

        let pipeline = self.pipeline.clone();
        let sink = self.outbound.clone();
        self.turn = Some(tokio::spawn(async move {
            pipeline.run_turn(request, &sink, &mut interrupt).await
        }));
    }

    /// Resolves when the in-flight turn ends; pending when there is none.
    pub async fn join_turn(&mut self) -> Result<TurnOutcome, JoinError> {
        match self.turn.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    }

    /// Releases the processing flag whichever way the turn ended.
    pub fn finish_turn(&mut self, result: Result<TurnOutcome, JoinError>, now: Instant) {
        self.turn = None;
        self.interrupt = None;
        self.voiced_run = 0;
        let voiced = std::mem::take(&mut self.voiced_during_turn);
        self.session.processing = false;

        match result {
            Ok(outcome) => self.session.history.extend(outcome.turns),
            Err(e) if e.is_panic() => error!("turn task panicked: {}", e),
            Err(e) => debug!("turn task cancelled: {}", e),
        }

        if !self.session.has_audio() || self.stopped {
            return;
        }
        // Line silence streamed during the turn is not an utterance.
        if !voiced {
            debug!(
                bytes = self.session.buffered_bytes(),
                "only silence arrived during the turn; discarded"
            );
            self.session.clear_buffer();
            return;
        }
        // Speech queued during the turn gets its own window.
        if !self.segmenter.is_armed() {
            self.segmenter.rearm(now);
        }
    }

    /// Abandons any in-flight turn. Its processes are killed on drop.
    pub fn shutdown(&mut self) {
        self.segmenter.cancel();
        if let Some(handle) = self.turn.take() {
            handle.abort();
        }
        self.session.processing = false;
    }
}
