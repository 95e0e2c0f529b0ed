//! Call-control markup returned to the carrier's call-setup webhook.

use callbridge_types::CallerIdentity;
use thiserror::Error;
use url::Url;

/// Route the media socket is served on.
pub const MEDIA_PATH: &str = "/media";

#[derive(Debug, Error)]
pub enum TwimlError {
    #[error("invalid public URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported public URL scheme: {0}")]
    Scheme(String),

    #[error("no public URL configured and no Host header on the request")]
    NoHost,
}

/// Escapes text and attribute values.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Speak `message`, then hang up. No media socket is opened.
pub fn reject(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>{}</Say><Hangup/></Response>"#,
        escape_xml(message)
    )
}

/// Greet the caller, then attach the call to the media socket at `stream_url`.
pub fn connect_stream(greeting: &str, stream_url: &Url, identity: &CallerIdentity) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#,
            "<Say>{greeting}</Say>",
            r#"<Connect><Stream url="{url}">"#,
            r#"<Parameter name="caller" value="{caller}"/>"#,
            r#"<Parameter name="callerName" value="{name}"/>"#,
            "</Stream></Connect></Response>"
        ),
        greeting = escape_xml(greeting),
        url = escape_xml(stream_url.as_str()),
        caller = escape_xml(&identity.number),
        name = escape_xml(&identity.name),
    )
}

/// Builds the socket URL the carrier should open for this caller.
///
/// The caller travels in the query string: it is the only channel available
/// before the socket handshake. `public_url` wins over the request's `Host`.
/// An admission `token` is appended for calls that bypass the allow-list.
pub fn stream_url(
    public_url: Option<&str>,
    host: Option<&str>,
    identity: &CallerIdentity,
    token: Option<&str>,
) -> Result<Url, TwimlError> {
    let mut url = match public_url {
        Some(base) => {
            let mut url = Url::parse(base)?;
            let scheme = match url.scheme() {
                "https" | "wss" => "wss",
                "http" | "ws" => "ws",
                other => return Err(TwimlError::Scheme(other.to_string())),
            };
            url.set_scheme(scheme)
                .map_err(|_| TwimlError::Scheme(scheme.to_string()))?;
            let path = format!("{}{}", url.path().trim_end_matches('/'), MEDIA_PATH);
            url.set_path(&path);
            url
        }
        None => {
            let host = host.filter(|h| !h.is_empty()).ok_or(TwimlError::NoHost)?;
            Url::parse(&format!("wss://{}{}", host, MEDIA_PATH))?
        }
    };

    url.set_query(None);
    url.set_fragment(None);
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("caller", &identity.number)
            .append_pair("name", &identity.name);
        if let Some(token) = token {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

/// The call-control endpoint on the same public base, for outbound calls.
pub fn voice_webhook_url(public_url: &str) -> Result<Url, TwimlError> {
    let mut url = Url::parse(public_url)?;
    let path = format!("{}/twilio/voice", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}
