mod sse;

use std::{env, pin::Pin};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use sse::{SseDecoder, SseEvent};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer in plain conversational sentences; your reply will be read aloud.";

/// Errors raised while opening or consuming a token stream.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY must be set in the environment")]
    MissingApiKey,

    #[error("invalid LLM configuration: {0}")]
    Config(String),

    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream chunk: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token stream failed: {0}")]
    Stream(String),
}

/// A lazily produced, finite sequence of text tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Something that turns a prompt into a stream of generated tokens.
///
/// A stream is consumed once; call `stream` again for a new generation.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn stream(&self, prompt: &str) -> Result<TokenStream, LlmError>;
}

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// One `chat.completion.chunk` event of a streamed response
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
}

impl OpenAiChatConfig {
    /// Read settings from the environment. Only the API key is mandatory.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        let temperature = match env::var("LLM_TEMPERATURE") {
            Ok(raw) => raw
                .parse::<f32>()
                .map_err(|_| LlmError::Config(format!("LLM_TEMPERATURE is not a number: {raw}")))?,
            Err(_) => DEFAULT_TEMPERATURE,
        };

        Ok(Self {
            api_key,
            base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            temperature,
            system_prompt: env::var("LLM_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.into()),
        })
    }
}

/// Streaming chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiTokenSource {
    config: OpenAiChatConfig,
    client: Client,
}

impl OpenAiTokenSource {
    pub fn new(config: OpenAiChatConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TokenSource for OpenAiTokenSource {
    async fn stream(&self, prompt: &str) -> Result<TokenStream, LlmError> {
        info!(model = %self.config.model, prompt_len = prompt.len(), "opening token stream");

        let req_body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                Message { role: "system", content: &self.config.system_prompt },
                Message { role: "user", content: prompt },
            ],
            temperature: self.config.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&req_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        Ok(decode_token_stream(response.bytes_stream()))
    }
}

/// Turn an SSE body into the tokens carried by its `delta.content` fields.
pub fn decode_token_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let e: LlmError = e.into();
                    yield Err(e);
                    return;
                }
            };
            for event in decoder.push(chunk.as_ref()) {
                match event {
                    SseEvent::Done => {
                        debug!("token stream finished");
                        return;
                    }
                    SseEvent::Data(data) => match token_from_chunk(&data) {
                        Ok(Some(token)) => yield Ok(token),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                }
            }
        }

        if let Some(SseEvent::Data(data)) = decoder.finish() {
            match token_from_chunk(&data) {
                Ok(Some(token)) => yield Ok(token),
                Ok(None) => {}
                Err(e) => yield Err(e),
            }
        }
        debug!("token stream finished");
    })
}

fn token_from_chunk(data: &str) -> Result<Option<String>, LlmError> {
    let chunk: ChatChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(parts: &[&'static str]) -> Vec<Result<&'static [u8], LlmError>> {
        parts.iter().map(|p| Ok(p.as_bytes())).collect()
    }

    async fn collect(tokens: TokenStream) -> Vec<Result<String, LlmError>> {
        tokens.collect().await
    }

    #[tokio::test]
    async fn test_yields_delta_content_in_order() {
        let parts = body(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":",
            "{\"content\":\"lo.\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let tokens: Vec<String> = collect(decode_token_stream(stream::iter(parts)))
            .await
            .into_iter()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(tokens, vec!["Hel".to_string(), "lo.".to_string()]);
    }

    #[tokio::test]
    async fn test_stops_at_done_marker() {
        let parts = body(&[
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);
        assert!(collect(decode_token_stream(stream::iter(parts))).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_an_error() {
        let parts = body(&["data: {not json}\n\n"]);
        let out = collect(decode_token_stream(stream::iter(parts))).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(LlmError::Decode(_))));
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let parts: Vec<Result<&'static [u8], LlmError>> = vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".as_bytes()),
            Err(LlmError::Stream("connection reset".into())),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".as_bytes()),
        ];
        let out = collect(decode_token_stream(stream::iter(parts))).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "a");
        assert!(matches!(out[1], Err(LlmError::Stream(_))));
    }

    #[test]
    fn test_chat_request_shape() {
        let req = ChatRequest {
            model: "m",
            messages: vec![Message { role: "user", content: "hi" }],
            temperature: 0.3,
            stream: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
