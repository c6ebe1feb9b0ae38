mod pcm;

use std::env;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use pcm::{pcm16_duration_ms, OPENAI_PCM_SAMPLE_RATE};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini-tts";
const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_RESPONSE_FORMAT: &str = "pcm";

/// Errors from a single synthesis call.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("OPENAI_API_KEY must be set in the environment")]
    MissingApiKey,

    #[error("TTS request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TTS provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("TTS provider returned no audio")]
    EmptyAudio,

    #[error("TTS error: {0}")]
    Provider(String),
}

/// Converts one piece of text into encoded audio.
///
/// Implementations are shared by every session, so they must be usable
/// concurrently through `&self`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiSpeechConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub response_format: String,
}

impl OpenAiSpeechConfig {
    pub fn from_env() -> Result<Self, TtsError> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(TtsError::MissingApiKey)?;

        Ok(Self {
            api_key,
            base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            model: env::var("TTS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            voice: env::var("TTS_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.into()),
            response_format: env::var("TTS_RESPONSE_FORMAT")
                .unwrap_or_else(|_| DEFAULT_RESPONSE_FORMAT.into()),
        })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Client for the OpenAI-compatible `/audio/speech` endpoint.
pub struct OpenAiSpeech {
    config: OpenAiSpeechConfig,
    client: Client,
}

impl OpenAiSpeech {
    pub fn new(config: OpenAiSpeechConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &OpenAiSpeechConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        let body = SpeechRequest {
            model: &self.config.model,
            voice: &self.config.voice,
            input: text,
            response_format: &self.config.response_format,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Status { status: status.as_u16(), body });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(TtsError::EmptyAudio);
        }

        if self.config.response_format == DEFAULT_RESPONSE_FORMAT {
            debug!(
                bytes = audio.len(),
                duration_ms = pcm16_duration_ms(audio.len(), OPENAI_PCM_SAMPLE_RATE),
                "speech synthesized"
            );
        } else {
            debug!(bytes = audio.len(), format = %self.config.response_format, "speech synthesized");
        }
        Ok(audio)
    }
}
