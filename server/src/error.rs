use thiserror::Error;

use crate::protocol::OutboundMessage;

/// Problems with an inbound websocket payload. Reported inline; no session
/// is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("invalid JSON")]
    InvalidJson,

    #[error("{0}")]
    InvalidInput(String),
}

impl ApiError {
    /// The message sent back over the socket.
    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage::error(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_json_message() {
        assert_eq!(ApiError::InvalidJson.to_message().to_json(), r#"{"error":"invalid JSON"}"#);
    }

    #[test]
    fn test_invalid_input_message() {
        let msg = ApiError::InvalidInput("Message cannot be empty".into()).to_message();
        assert_eq!(msg, OutboundMessage::error("Message cannot be empty"));
    }
}
