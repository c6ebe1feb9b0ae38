use crate::error::ApiError;
use crate::protocol::SessionRequest;

/// Parse and validate one inbound websocket text message, returning the prompt.
pub fn parse_session_request(raw: &str, max_chars: usize) -> Result<String, ApiError> {
    let request: SessionRequest = serde_json::from_str(raw).map_err(|_| ApiError::InvalidJson)?;
    let message = request
        .message
        .ok_or_else(|| ApiError::InvalidInput("Missing 'message' field".to_string()))?;
    validate_message(&message, max_chars)?;
    Ok(message)
}

/// Validate a prompt before a session is started for it
pub fn validate_message(message: &str, max_chars: usize) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message cannot be empty".to_string()));
    }
    if message.chars().count() > max_chars {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            max_chars
        )));
    }
    Ok(())
}
