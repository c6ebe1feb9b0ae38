//! Streams spoken audio for an LLM reply over a websocket while the reply is
//! still being generated.

pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod validation;
pub mod ws;

pub use app::{build_router, AppState};
pub use config::{PipelineConfig, ServerConfig};
