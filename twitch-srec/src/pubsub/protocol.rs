//! PubSub wire format.
//!
//! Outbound frames are `LISTEN` and `PING`. Inbound frames are `PONG`,
//! `RECONNECT`, `RESPONSE` (the answer to a `LISTEN`, matched by nonce) and
//! `MESSAGE`, whose `data.message` is itself a JSON document encoded as a
//! string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

pub const PING: &str = r#"{"type":"PING"}"#;

#[derive(Debug, Clone, Serialize)]
struct ListenData {
    topics: Vec<String>,
    auth_token: String,
}

/// Topic subscription request.
#[derive(Debug, Clone, Serialize)]
pub struct ListenRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    nonce: String,
    data: ListenData,
}

impl ListenRequest {
    pub fn new(topics: Vec<String>, auth_token: impl Into<String>) -> Self {
        Self {
            kind: "LISTEN",
            nonce: Uuid::new_v4().simple().to_string(),
            data: ListenData {
                topics,
                auth_token: auth_token.into(),
            },
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Log-friendly form without the token.
    pub fn describe(&self) -> String {
        format!(
            "LISTEN nonce={} topics={}",
            self.nonce,
            self.data.topics.join(",")
        )
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    topic: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct PlaybackPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    server_time: Option<f64>,
    #[serde(default)]
    viewers: Option<u64>,
}

/// `type` of a video playback message.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackKind {
    StreamUp,
    StreamDown,
    Viewcount,
    Other(String),
}

impl PlaybackKind {
    fn parse(kind: &str) -> Self {
        match kind {
            "stream-up" => Self::StreamUp,
            "stream-down" => Self::StreamDown,
            "viewcount" => Self::Viewcount,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackEvent {
    pub kind: PlaybackKind,
    pub server_time: Option<f64>,
    pub viewers: Option<u64>,
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Pong,
    Reconnect,
    /// Answer to a LISTEN. An empty `error` means success.
    Response { nonce: Option<String>, error: String },
    Message { topic: String, event: PlaybackEvent },
    Other(String),
}

pub fn parse_inbound(text: &str) -> Result<Inbound> {
    let envelope: Envelope = serde_json::from_str(text)?;
    Ok(match envelope.kind.as_str() {
        "PONG" => Inbound::Pong,
        "RECONNECT" => Inbound::Reconnect,
        "RESPONSE" => Inbound::Response {
            nonce: envelope.nonce,
            error: envelope.error.unwrap_or_default(),
        },
        "MESSAGE" => match envelope.data {
            Some(data) => {
                let payload: PlaybackPayload = serde_json::from_str(&data.message)?;
                Inbound::Message {
                    topic: data.topic,
                    event: PlaybackEvent {
                        kind: PlaybackKind::parse(&payload.kind),
                        server_time: payload.server_time,
                        viewers: payload.viewers,
                    },
                }
            }
            None => Inbound::Other(envelope.kind),
        },
        _ => Inbound::Other(envelope.kind),
    })
}

/// Channel id at the end of a `video-playback-by-id.<id>` topic.
pub fn channel_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .rsplit_once('.')
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_request_shape() {
        let request = ListenRequest::new(vec!["video-playback-by-id.123".to_string()], "tok");
        let value: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "LISTEN");
        assert_eq!(value["nonce"], request.nonce());
        assert_eq!(value["data"]["topics"][0], "video-playback-by-id.123");
        assert_eq!(value["data"]["auth_token"], "tok");
        assert!(!request.describe().contains("tok"));
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = ListenRequest::new(vec![], "");
        let b = ListenRequest::new(vec![], "");
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(parse_inbound(r#"{"type":"PONG"}"#).unwrap(), Inbound::Pong);
        assert_eq!(
            parse_inbound(r#"{"type":"RECONNECT"}"#).unwrap(),
            Inbound::Reconnect
        );
        assert_eq!(
            parse_inbound(r#"{"type":"RESPONSE","nonce":"n1","error":""}"#).unwrap(),
            Inbound::Response {
                nonce: Some("n1".to_string()),
                error: String::new()
            }
        );
        assert_eq!(
            parse_inbound(r#"{"type":"RESPONSE","nonce":"n1","error":"ERR_BADAUTH"}"#).unwrap(),
            Inbound::Response {
                nonce: Some("n1".to_string()),
                error: "ERR_BADAUTH".to_string()
            }
        );
    }

    #[test]
    fn test_parse_playback_messages() {
        let frame = r#"{"type":"MESSAGE","data":{"topic":"video-playback-by-id.123","message":"{\"type\":\"viewcount\",\"server_time\":1700000000.5,\"viewers\":42}"}}"#;
        let Inbound::Message { topic, event } = parse_inbound(frame).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(channel_id_from_topic(&topic), Some("123"));
        assert_eq!(event.kind, PlaybackKind::Viewcount);
        assert_eq!(event.viewers, Some(42));

        let frame = r#"{"type":"MESSAGE","data":{"topic":"video-playback-by-id.123","message":"{\"type\":\"stream-up\",\"server_time\":1,\"play_delay\":0}"}}"#;
        let Inbound::Message { event, .. } = parse_inbound(frame).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(event.kind, PlaybackKind::StreamUp);

        let frame = r#"{"type":"MESSAGE","data":{"topic":"video-playback-by-id.123","message":"{\"type\":\"commercial\"}"}}"#;
        let Inbound::Message { event, .. } = parse_inbound(frame).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(event.kind, PlaybackKind::Other("commercial".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_inbound("not json").is_err());
        assert!(
            parse_inbound(r#"{"type":"MESSAGE","data":{"topic":"t","message":"nope"}}"#).is_err()
        );
        assert_eq!(
            parse_inbound(r#"{"type":"WHATEVER"}"#).unwrap(),
            Inbound::Other("WHATEVER".to_string())
        );
    }

    #[test]
    fn test_channel_id_from_topic() {
        assert_eq!(channel_id_from_topic("video-playback-by-id.987"), Some("987"));
        assert_eq!(channel_id_from_topic("no-dot"), None);
        assert_eq!(channel_id_from_topic("trailing."), None);
    }
}
