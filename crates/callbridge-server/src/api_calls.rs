//! Outbound call API.

use crate::outbound::OutboundResult;
use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

/// Request body for `POST /api/calls`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateCallRequest {
    /// Destination in E.164 form. Falls back to `twilio.default_to`.
    #[serde(default)]
    pub to: Option<String>,
}

/// Handler for `POST /api/calls`.
///
/// `201` when the carrier accepted the call, `503` with the explanation
/// otherwise.
pub async fn create_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateCallRequest>,
) -> (StatusCode, Json<OutboundResult>) {
    let result = state.outbound.place_call(payload.to.as_deref()).await;
    let status = if result.placed {
        StatusCode::CREATED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(result))
}
