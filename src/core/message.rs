//! Wire frames exchanged with chat clients

use chrono::{LocalResult, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warp::ws::Message as WsMessage;

use crate::constants::ANONYMOUS_NAME;
use crate::error::{ChatError, Result};

/// A chat line as stored in history and broadcast to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    pub message: String,
    /// Logical timestamp in milliseconds, assigned by the room
    pub timestamp: i64,
}

impl ChatMessage {
    /// Storage key for this message; lexical order equals chronological order
    pub fn storage_key(&self) -> String {
        iso_key(self.timestamp)
    }
}

/// Render a millisecond timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn iso_key(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        LocalResult::Single(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        _ => format!("{:020}", timestamp_ms),
    }
}

/// Inbound frame. Clients send loose JSON objects, so every field is optional
/// and the room decides what the frame means from its session state.
#[derive(Debug, Default, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(ChatError::MessageParseError(
                "expected a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_ping(&self) -> bool {
        self.kind.as_deref() == Some("ping")
    }

    /// The requested name; empty, `false` and zero names become anonymous
    pub fn name_text(&self) -> Option<String> {
        self.name.as_ref().map(|value| {
            if is_falsy(value) {
                ANONYMOUS_NAME.to_string()
            } else {
                coerce_text(value)
            }
        })
    }

    pub fn message_text(&self) -> Option<String> {
        self.message.as_ref().map(coerce_text)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Chat(ChatMessage),
    Joined {
        joined: String,
    },
    Quit {
        quit: String,
    },
    Ready {
        ready: bool,
    },
    Error {
        error: String,
    },
    Pong {
        #[serde(rename = "type")]
        kind: String,
    },
}

impl ServerFrame {
    pub fn joined(name: &str) -> Self {
        ServerFrame::Joined {
            joined: name.to_string(),
        }
    }

    pub fn quit(name: &str) -> Self {
        ServerFrame::Quit {
            quit: name.to_string(),
        }
    }

    pub fn ready() -> Self {
        ServerFrame::Ready { ready: true }
    }

    pub fn error(err: &ChatError) -> Self {
        ServerFrame::Error {
            error: err.to_string(),
        }
    }

    pub fn pong() -> Self {
        ServerFrame::Pong {
            kind: "pong".to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Build a close frame, trimming the reason to the 123 bytes a close frame allows
pub fn close_message(code: u16, reason: &str) -> WsMessage {
    let mut end = reason.len().min(123);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    WsMessage::close_with(code, reason[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_key_matches_javascript_format() {
        assert_eq!(iso_key(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_key(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_iso_keys_sort_chronologically() {
        let earlier = iso_key(999);
        let later = iso_key(1_000);
        assert!(earlier < later);
    }

    #[test]
    fn test_parse_client_frames() {
        let frame = ClientFrame::parse(r#"{"name":"alice"}"#).unwrap();
        assert_eq!(frame.name_text().as_deref(), Some("alice"));
        assert!(frame.message_text().is_none());

        let frame = ClientFrame::parse(r#"{"type":"ping"}"#).unwrap();
        assert!(frame.is_ping());

        let frame = ClientFrame::parse(r#"{"message":42}"#).unwrap();
        assert_eq!(frame.message_text().as_deref(), Some("42"));
    }

    #[test]
    fn test_falsy_names_become_anonymous() {
        for raw in [r#"{"name":""}"#, r#"{"name":false}"#, r#"{"name":0}"#] {
            let frame = ClientFrame::parse(raw).unwrap();
            assert_eq!(frame.name_text().as_deref(), Some("anonymous"), "{}", raw);
        }

        let frame = ClientFrame::parse(r#"{"name":7}"#).unwrap();
        assert_eq!(frame.name_text().as_deref(), Some("7"));
        let frame = ClientFrame::parse(r#"{"name":true}"#).unwrap();
        assert_eq!(frame.name_text().as_deref(), Some("true"));
    }

    #[test]
    fn test_reject_non_objects() {
        assert!(ClientFrame::parse("[1,2]").is_err());
        assert!(ClientFrame::parse("not json").is_err());
    }

    #[test]
    fn test_server_frame_shapes() {
        assert_eq!(ServerFrame::joined("bob").to_json(), r#"{"joined":"bob"}"#);
        assert_eq!(ServerFrame::ready().to_json(), r#"{"ready":true}"#);
        assert_eq!(ServerFrame::pong().to_json(), r#"{"type":"pong"}"#);

        let chat = ServerFrame::Chat(ChatMessage {
            name: "alice".to_string(),
            message: "hi".to_string(),
            timestamp: 5,
        });
        assert_eq!(
            chat.to_json(),
            r#"{"name":"alice","message":"hi","timestamp":5}"#
        );
    }

    #[test]
    fn test_server_frames_read_back() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"name":"a","message":"b","timestamp":1}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Chat(_)));

        let frame: ServerFrame = serde_json::from_str(r#"{"quit":"a"}"#).unwrap();
        assert_eq!(frame, ServerFrame::quit("a"));
    }

    #[test]
    fn test_close_reason_is_truncated() {
        let long = "é".repeat(100);
        let msg = close_message(1011, &long);
        let (code, reason) = msg.close_frame().unwrap();
        assert_eq!(code, 1011);
        assert!(reason.len() <= 123);
    }
}
