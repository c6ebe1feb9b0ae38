//! JSON messages exchanged over the websocket.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::pipeline::Frame;

/// Inbound request that starts a session.
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Audio {
        content: String,
        seq: u64,
        sub_index: u32,
        end: bool,
    },
    SegmentError {
        error: String,
        text: String,
        seq: u64,
        end: bool,
    },
    Error {
        error: String,
    },
    End {
        end: bool,
    },
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error { error: message.into() }
    }

    pub fn end() -> Self {
        OutboundMessage::End { end: true }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain strings and integers.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"error\":\"encoding failed\"}"))
    }
}

impl From<&Frame> for OutboundMessage {
    fn from(frame: &Frame) -> Self {
        match frame {
            Frame::Audio { seq, sub_index, payload } => OutboundMessage::Audio {
                content: general_purpose::STANDARD.encode(payload),
                seq: *seq,
                sub_index: *sub_index,
                end: false,
            },
            Frame::SegmentError { seq, text, error } => OutboundMessage::SegmentError {
                error: error.clone(),
                text: text.clone(),
                seq: *seq,
                end: false,
            },
            Frame::SessionError { error } => OutboundMessage::error(error.clone()),
            Frame::End => OutboundMessage::end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn value(frame: Frame) -> serde_json::Value {
        serde_json::from_str(&OutboundMessage::from(&frame).to_json()).unwrap()
    }

    #[test]
    fn test_audio_frame_wire_format() {
        let v = value(Frame::Audio { seq: 4, sub_index: 1, payload: Bytes::from_static(b"hi!") });
        assert_eq!(v, json!({"content": "aGkh", "seq": 4, "sub_index": 1, "end": false}));
    }

    #[test]
    fn test_segment_error_wire_format() {
        let v = value(Frame::SegmentError { seq: 2, text: "Hello.".into(), error: "quota".into() });
        assert_eq!(v, json!({"error": "quota", "text": "Hello.", "seq": 2, "end": false}));
    }

    #[test]
    fn test_end_and_session_error_wire_format() {
        assert_eq!(value(Frame::End), json!({"end": true}));
        assert_eq!(value(Frame::SessionError { error: "llm down".into() }), json!({"error": "llm down"}));
    }

    #[test]
    fn test_invalid_json_reply() {
        assert_eq!(OutboundMessage::error("invalid JSON").to_json(), r#"{"error":"invalid JSON"}"#);
    }
}
