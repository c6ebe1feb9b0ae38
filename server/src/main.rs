use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use llm_core::{OpenAiChatConfig, OpenAiTokenSource};
use tts_core::{OpenAiSpeech, OpenAiSpeechConfig};

use server::pipeline::Orchestrator;
use server::{build_router, AppState, PipelineConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting streaming speech server...");

    let config = ServerConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    pipeline.validate()?;

    // One HTTP client shared by both providers
    let http = reqwest::Client::new();

    let chat = OpenAiChatConfig::from_env()?;
    info!("LLM model: {}", chat.model);
    let token_source = Arc::new(OpenAiTokenSource::new(chat, http.clone()));

    let speech = OpenAiSpeechConfig::from_env()?;
    info!("TTS model: {}, voice: {}", speech.model, speech.voice);
    let synthesizer = Arc::new(OpenAiSpeech::new(speech, http));

    info!(
        "Pipeline configuration loaded: workers={}, chunk_bytes={}, queues={}/{}/{}, first_segment_min={}",
        pipeline.synthesis_parallelism,
        pipeline.audio_chunk_bytes,
        pipeline.text_queue_capacity,
        pipeline.result_queue_capacity,
        pipeline.frame_queue_capacity,
        pipeline.min_segment_len,
    );

    let orchestrator = Orchestrator::new(token_source, synthesizer, pipeline);
    let state = AppState::new(orchestrator, config.clone());
    let app = build_router(state);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on ws://{addr}/ws");
    axum::serve(listener, app).await?;
    Ok(())
}
