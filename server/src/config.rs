// Configuration for the listener and the streaming pipeline

use std::{net::SocketAddr, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be at least 1")]
    Zero { name: &'static str },

    #[error("invalid listen address {0}")]
    Address(String),
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ws_max_message_bytes: usize,
    pub max_message_chars: usize,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8910,
            ws_max_message_bytes: 8_000_000,
            max_message_chars: 8_000,
            cors_allowed_origins: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            ws_max_message_bytes: env_or("WS_MAX_MESSAGE_BYTES", defaults.ws_max_message_bytes),
            max_message_chars: env_or("MAX_MESSAGE_CHARS", defaults.max_message_chars),
            cors_allowed_origins,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Address(format!("{}:{}", self.host, self.port)))
    }
}

/// Sizes of the pipeline stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Concurrent synthesis workers per session.
    pub synthesis_parallelism: usize,
    /// Maximum payload size of one audio frame.
    pub audio_chunk_bytes: usize,
    pub text_queue_capacity: usize,
    pub result_queue_capacity: usize,
    pub frame_queue_capacity: usize,
    /// Characters a segment must reach before a separator may end it.
    pub min_segment_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            synthesis_parallelism: 2,
            audio_chunk_bytes: 64_000,
            text_queue_capacity: 8,
            result_queue_capacity: 16,
            frame_queue_capacity: 64,
            min_segment_len: 80,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            synthesis_parallelism: env_or("TTS_PARALLELISM", defaults.synthesis_parallelism),
            audio_chunk_bytes: env_or("AUDIO_CHUNK_BYTES", defaults.audio_chunk_bytes),
            text_queue_capacity: env_or("MAX_TEXT_Q", defaults.text_queue_capacity),
            result_queue_capacity: env_or("MAX_AUDIO_Q", defaults.result_queue_capacity),
            frame_queue_capacity: env_or("MAX_WS_Q", defaults.frame_queue_capacity),
            min_segment_len: env_or("FIRST_SENTENCE_MIN", defaults.min_segment_len),
        }
    }

    /// Every size must be non-zero; a zero-capacity queue cannot be built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("TTS_PARALLELISM", self.synthesis_parallelism),
            ("AUDIO_CHUNK_BYTES", self.audio_chunk_bytes),
            ("MAX_TEXT_Q", self.text_queue_capacity),
            ("MAX_AUDIO_Q", self.result_queue_capacity),
            ("MAX_WS_Q", self.frame_queue_capacity),
            ("FIRST_SENTENCE_MIN", self.min_segment_len),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
