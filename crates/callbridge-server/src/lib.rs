//! Callbridge server library logic.
//!
//! Bridges a carrier's media stream to speech recognition, an agent backend,
//! and speech synthesis, one WebSocket per call.

pub mod api;
pub mod api_calls;
pub mod api_media;
pub mod api_twilio;
pub mod config;
pub mod gate;
pub mod middleware;
pub mod orchestrator;
pub mod outbound;
pub mod segmenter;
pub mod session;
pub mod twiml;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use callbridge_voice::{CommandAgent, FormatBridge, SttService, TtsService};
use config::Config;
use gate::{Admissions, CallerGate};
use orchestrator::{PromptSettings, VoicePipeline};
use outbound::OutboundCaller;
use segmenter::SegmentationPolicy;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Webhook forms and API bodies are small; media arrives over the socket.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
///
/// Everything here is read-only after startup apart from [`Admissions`].
/// Per-call state lives in the socket task that owns it.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gate: CallerGate,
    /// Stream tokens issued to calls this service placed.
    pub admissions: Admissions,
    pub pipeline: Arc<VoicePipeline>,
    pub policy: SegmentationPolicy,
    pub outbound: Arc<OutboundCaller>,
}

impl AppState {
    /// Builds state around an explicit pipeline.
    pub fn new(config: Config, pipeline: Arc<VoicePipeline>, policy: SegmentationPolicy) -> Self {
        Self {
            gate: CallerGate::from_config(&config.callers),
            admissions: Admissions::new(),
            outbound: Arc::new(OutboundCaller::from_config(&config)),
            pipeline,
            policy,
            config: Arc::new(config),
        }
    }

    /// Builds the production pipeline from configuration.
    pub fn from_config(config: Config) -> Self {
        let bridge = FormatBridge::from_config(&config.media);
        let stt = SttService::from_config(&config.stt, bridge.clone());
        let tts = TtsService::from_config(&config.tts, &bridge);
        let agent = CommandAgent::from_config(&config.agent);
        let pipeline = VoicePipeline::new(
            Arc::new(stt),
            tts,
            Arc::new(agent),
            PromptSettings::from_config(&config.conversation),
        );
        Self::new(config, Arc::new(pipeline), SegmentationPolicy::default())
    }
}

/// Health check handler.
///
/// Returns `200 OK` with service name and version.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "callbridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/calls", post(api_calls::create_call_handler))
        .layer(axum::middleware::from_fn(middleware::require_api_token));

    Router::new()
        .route("/health", get(health))
        .route("/twilio/voice", post(api_twilio::voice_webhook_handler))
        .route(twiml::MEDIA_PATH, get(api_media::media_handler))
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
