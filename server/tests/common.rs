//! Common utilities for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use llm_core::{LlmError, TokenSource, TokenStream};
use server::pipeline::Orchestrator;
use server::PipelineConfig;
use tts_core::{SpeechSynthesizer, TtsError};

/// Replays a fixed list of tokens, optionally failing or hanging afterwards.
#[derive(Clone, Default)]
pub struct ScriptedTokenSource {
    tokens: Vec<String>,
    delay: Duration,
    fail_with: Option<String>,
    fail_on_open: bool,
    hang: bool,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedTokenSource {
    pub fn new(tokens: &[&str]) -> Self {
        Self { tokens: tokens.iter().map(|t| t.to_string()).collect(), ..Default::default() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Yield an error once every token has been produced.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn failing_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    /// Never end the stream after the last token.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Number of tokens the pipeline has pulled so far.
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        self.pulled.clone()
    }
}

#[async_trait]
impl TokenSource for ScriptedTokenSource {
    async fn stream(&self, _prompt: &str) -> Result<TokenStream, LlmError> {
        if self.fail_on_open {
            return Err(LlmError::Stream("connection refused".into()));
        }

        let mut items: Vec<Result<String, LlmError>> =
            self.tokens.iter().cloned().map(Ok).collect();
        if let Some(ref message) = self.fail_with {
            items.push(Err(LlmError::Stream(message.clone())));
        }

        let delay = self.delay;
        let pulled = self.pulled.clone();
        let scripted = stream::iter(items).then(move |item| {
            let pulled = pulled.clone();
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                item
            }
        });

        if self.hang {
            Ok(Box::pin(scripted.chain(stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}

/// "Synthesizes" a segment by returning its text as the audio bytes.
#[derive(Clone, Default)]
pub struct ScriptedSynthesizer {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    panics: HashSet<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failures.insert(text.to_string());
        self
    }

    pub fn panicking_on(mut self, text: &str) -> Self {
        self.panics.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.panics.contains(text) {
            panic!("synthesizer crashed on {text:?}");
        }
        if self.failures.contains(text) {
            return Err(TtsError::Provider(format!("voice unavailable for {text:?}")));
        }
        Ok(Bytes::from(text.to_string()))
    }
}

/// Small pipeline where every sentence token becomes its own segment.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        synthesis_parallelism: 2,
        audio_chunk_bytes: 64_000,
        text_queue_capacity: 8,
        result_queue_capacity: 16,
        frame_queue_capacity: 64,
        min_segment_len: 3,
    }
}

pub fn orchestrator(
    source: ScriptedTokenSource,
    synthesizer: ScriptedSynthesizer,
    config: PipelineConfig,
) -> Orchestrator {
    Orchestrator::new(Arc::new(source), Arc::new(synthesizer), config)
}

/// Drain everything written to a channel sink and parse it.
pub async fn collect_messages(mut rx: mpsc::Receiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(text) = rx.recv().await {
        out.push(serde_json::from_str(&text).expect("sink received invalid JSON"));
    }
    out
}

/// Decoded audio payload of an audio message.
pub fn audio_text(message: &Value) -> String {
    let content = message["content"].as_str().expect("not an audio message");
    let bytes = general_purpose::STANDARD.decode(content).expect("invalid base64");
    String::from_utf8(bytes).expect("audio payload is not text")
}

pub fn is_end(message: &Value) -> bool {
    message["end"] == Value::Bool(true)
}

/// Compact rendering of a message stream, e.g. `["0.0", "1!", "end"]`.
pub fn describe(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| {
            if is_end(m) {
                "end".to_string()
            } else if m.get("content").is_some() {
                format!("{}.{}", m["seq"], m["sub_index"])
            } else if m.get("seq").is_some() {
                format!("{}!", m["seq"])
            } else {
                "error".to_string()
            }
        })
        .collect()
}
