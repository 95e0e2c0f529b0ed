//! Outbound calls through the carrier's REST control plane.

use crate::config::Config;
use crate::twiml::voice_webhook_url;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("carrier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("carrier refused the call ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected carrier response: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct CreatedCall {
    sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CarrierFault {
    message: Option<String>,
}

/// Minimal client for the carrier's Calls resource.
#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl fmt::Debug for TwilioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioClient")
            .field("api_base", &self.api_base)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

impl TwilioClient {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Creates a call from `from` to `to`; the carrier fetches call-control
    /// markup from `webhook_url` once it answers. Returns the call SID.
    pub async fn create_call(
        &self,
        to: &str,
        from: &str,
        webhook_url: &str,
    ) -> Result<String, CarrierError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to),
                ("From", from),
                ("Url", webhook_url),
                ("Method", "POST"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<CarrierFault>(&body)
                .ok()
                .and_then(|f| f.message)
                .unwrap_or(body);
            return Err(CarrierError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreatedCall = response
            .json()
            .await
            .map_err(|e| CarrierError::Decode(e.to_string()))?;
        created
            .sid
            .ok_or_else(|| CarrierError::Decode("response carries no call sid".to_string()))
    }
}

/// Outcome of an outbound request, phrased for a person to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResult {
    pub placed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
}

impl OutboundResult {
    fn not_placed(message: impl Into<String>) -> Self {
        Self {
            placed: false,
            message: message.into(),
            call_sid: None,
        }
    }
}

/// Places calls that land on the same voice pipeline as inbound ones.
#[derive(Debug, Clone)]
pub struct OutboundCaller {
    client: Option<TwilioClient>,
    from: String,
    default_to: Option<String>,
    public_url: Option<String>,
}

impl OutboundCaller {
    pub fn new(
        client: Option<TwilioClient>,
        from: impl Into<String>,
        default_to: Option<String>,
        public_url: Option<String>,
    ) -> Self {
        Self {
            client,
            from: from.into(),
            default_to,
            public_url,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let twilio = &config.twilio;
        let client = twilio.configured().then(|| {
            TwilioClient::new(&twilio.api_base, &twilio.account_sid, &twilio.auth_token)
        });
        Self::new(
            client,
            &twilio.phone_number,
            twilio.default_to.clone(),
            config.server.public_url.clone(),
        )
    }

    pub async fn place_call(&self, to: Option<&str>) -> OutboundResult {
        let Some(client) = &self.client else {
            return OutboundResult::not_placed(
                "Outbound calling is not configured: set the Twilio account SID, auth token, and phone number.",
            );
        };
        let Some(public_url) = self.public_url.as_deref().filter(|u| !u.is_empty()) else {
            return OutboundResult::not_placed(
                "Outbound calling needs a public URL so the carrier can reach this server; set server.public_url.",
            );
        };
        let Some(to) = to
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or(self.default_to.as_deref())
        else {
            return OutboundResult::not_placed(
                "No destination number given and no default destination configured.",
            );
        };

        let webhook = match voice_webhook_url(public_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("cannot build call-control URL: {}", e);
                return OutboundResult::not_placed(format!(
                    "The configured public URL is not usable: {}",
                    e
                ));
            }
        };

        match client.create_call(to, &self.from, webhook.as_str()).await {
            Ok(sid) => {
                tracing::info!(call_sid = %sid, to, "outbound call placed");
                OutboundResult {
                    placed: true,
                    message: format!("Calling {} now.", to),
                    call_sid: Some(sid),
                }
            }
            Err(e) => {
                tracing::warn!(to, "outbound call failed: {}", e);
                OutboundResult::not_placed(format!("The call to {} could not be placed: {}", to, e))
            }
        }
    }
}
