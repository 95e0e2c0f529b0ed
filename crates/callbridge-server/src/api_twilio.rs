//! Call-setup webhook.

use crate::api::ApiError;
use crate::gate::GateDecision;
use crate::twiml;
use crate::AppState;
use axum::{
    extract::{Extension, Form},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

/// Form fields the carrier posts when a call connects.
#[derive(Debug, Default, Deserialize)]
pub struct VoiceWebhook {
    #[serde(rename = "CallSid", default)]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    /// `inbound`, `outbound-api`, or `outbound-dial`.
    #[serde(rename = "Direction", default)]
    pub direction: String,
}

impl VoiceWebhook {
    /// Calls this service placed itself.
    pub fn is_outbound(&self) -> bool {
        self.direction.starts_with("outbound")
    }
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

/// Handler for `POST /twilio/voice`.
pub async fn voice_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(call): Form<VoiceWebhook>,
) -> Result<Response, ApiError> {
    let conversation = &state.config.conversation;

    let (identity, token) = if call.is_outbound() {
        let identity = state.gate.identify(&call.to);
        let token = state.admissions.issue(identity.clone());
        (identity, Some(token))
    } else {
        match state.gate.check(&call.from) {
            GateDecision::Allow(identity) => (identity, None),
            GateDecision::Deny => {
                tracing::warn!(
                    call_sid = %call.call_sid,
                    caller = %call.from,
                    "caller not on allow-list; rejecting"
                );
                return Ok(xml(twiml::reject(&conversation.rejection)));
            }
        }
    };

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());
    let stream_url = twiml::stream_url(
        state.config.server.public_url.as_deref(),
        host,
        &identity,
        token.as_deref(),
    )
    .map_err(|e| {
        tracing::error!(call_sid = %call.call_sid, "cannot build media stream URL: {}", e);
        ApiError::InternalServerError(e.to_string())
    })?;

    tracing::info!(
        call_sid = %call.call_sid,
        caller = %identity.number,
        name = %identity.name,
        outbound = call.is_outbound(),
        "call admitted; attaching media stream"
    );
    Ok(xml(twiml::connect_stream(
        &conversation.greeting,
        &stream_url,
        &identity,
    )))
}
