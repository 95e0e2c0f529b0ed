//! Media-stream protocol frames.
//!
//! The carrier exchanges JSON text frames over a persistent WebSocket. Every
//! frame carries an `event` discriminator; audio travels as base64-encoded
//! μ-law 8 kHz in `media.payload`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frames the carrier sends to us.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    /// First frame after the socket opens.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    /// Stream metadata; binds the socket to a stream and call.
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },
    /// One chunk of caller audio.
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    /// Echo of a mark we sent, once the audio before it finished playing.
    Mark { mark: MarkPayload },
    /// The stream ended (caller hung up or the call was redirected).
    Stop {
        #[serde(default)]
        stop: Option<StopMetadata>,
    },
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The `event` name, for logging.
    pub fn event(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Mark { .. } => "mark",
            Self::Stop { .. } => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    /// `<Parameter>` values from the call-control markup.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MediaPayload {
    /// Decodes the base64 payload into raw μ-law bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.payload.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    #[serde(default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

/// Frames we send to the carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Discard any audio the carrier has queued for playback.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    /// One playback frame of μ-law audio.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Echoed back by the carrier once everything before it has played.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
}

impl OutboundFrame {
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    /// Builds a media frame, base64-encoding `audio`.
    pub fn media(stream_sid: impl Into<String>, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: STANDARD.encode(audio),
            },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Self::Clear { .. } => "clear",
            Self::Media { .. } => "media",
            Self::Mark { .. } => "mark",
        }
    }

    /// Raw audio carried by a media frame.
    pub fn audio(&self) -> Option<Vec<u8>> {
        match self {
            Self::Media { media, .. } => STANDARD.decode(media.payload.as_bytes()).ok(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_start_frame() {
        let text = json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ123",
            "start": {
                "streamSid": "MZ123",
                "callSid": "CA456",
                "accountSid": "AC789",
                "tracks": ["inbound"],
                "customParameters": { "caller": "+15551234567" },
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            }
        })
        .to_string();

        match InboundFrame::parse(&text).unwrap() {
            InboundFrame::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ123"));
                assert_eq!(start.call_sid.as_deref(), Some("CA456"));
                assert_eq!(start.custom_parameters["caller"], "+15551234567");
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn parses_media_frame_and_decodes_payload() {
        let text = json!({
            "event": "media",
            "streamSid": "MZ123",
            "media": { "track": "inbound", "chunk": "2", "timestamp": "20", "payload": "AAEC/w==" }
        })
        .to_string();

        let InboundFrame::Media { media, .. } = InboundFrame::parse(&text).unwrap() else {
            panic!("expected media frame");
        };
        assert_eq!(media.decode().unwrap(), vec![0x00, 0x01, 0x02, 0xff]);
    }

    #[test]
    fn parses_bare_lifecycle_frames() {
        let connected = InboundFrame::parse(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#)
            .unwrap();
        assert_eq!(connected.event(), "connected");

        let stop = InboundFrame::parse(r#"{"event":"stop","streamSid":"MZ1"}"#).unwrap();
        assert_eq!(stop, InboundFrame::Stop { stop: None });

        let mark = InboundFrame::parse(r#"{"event":"mark","mark":{"name":"reply-1"}}"#).unwrap();
        assert_eq!(
            mark,
            InboundFrame::Mark {
                mark: MarkPayload {
                    name: "reply-1".into()
                }
            }
        );
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(InboundFrame::parse(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).is_err());
    }

    #[test]
    fn outbound_frames_use_carrier_field_names() {
        let media = OutboundFrame::media("MZ1", &[1, 2, 3]);
        let value: serde_json::Value = serde_json::from_str(&media.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["media"]["payload"], "AQID");
        assert_eq!(media.audio().unwrap(), vec![1, 2, 3]);

        let clear: serde_json::Value =
            serde_json::from_str(&OutboundFrame::clear("MZ1").to_json().unwrap()).unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ1"}));

        let mark: serde_json::Value =
            serde_json::from_str(&OutboundFrame::mark("MZ1", "reply-x").to_json().unwrap()).unwrap();
        assert_eq!(
            mark,
            json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "reply-x"}})
        );
    }
}
