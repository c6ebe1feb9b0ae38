use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::StreamExt;
use llm_core::{LlmError, TokenSource};
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tts_core::SpeechSynthesizer;
use uuid::Uuid;

use super::{
    delivery::{run_sender, DeliveryError, FrameSink},
    framer::{run_framing_stage, FramingError, FramingStats},
    Frame, Framer, Queued, ResultEvent, Segmenter, SubmissionWindow, SynthesisPool, TextSegment,
    WorkerStats,
};
use crate::config::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("token source failed: {0}")]
    TokenSource(#[from] LlmError),

    #[error("session cancelled")]
    Cancelled,

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("pipeline stage stopped unexpectedly: {0}")]
    Stage(String),
}

impl From<FramingError> for SessionError {
    fn from(e: FramingError) -> Self {
        SessionError::Stage(e.to_string())
    }
}

/// Summary of a completed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub segments: u64,
    pub failed_segments: u64,
    pub frames_sent: u64,
    pub time_to_first_audio: Option<Duration>,
    pub synthesis_latencies: Vec<Duration>,
    pub elapsed: Duration,
}

/// Producer ends and task handles the driving half of a session owns.
struct Stages {
    text_tx: mpsc::Sender<Queued<TextSegment>>,
    result_tx: mpsc::Sender<ResultEvent>,
    frame_tx: mpsc::Sender<Frame>,
    workers: JoinSet<WorkerStats>,
    framing: JoinHandle<Result<FramingStats, FramingError>>,
    window: SubmissionWindow,
}

/// Everything the driving half of a session collected.
struct Drained {
    submitted: u64,
    workers: Vec<WorkerStats>,
    framing: FramingStats,
}

/// Builds and runs one pipeline per prompt. Cheap to clone; the provider
/// clients are shared by every session.
#[derive(Clone)]
pub struct Orchestrator {
    token_source: Arc<dyn TokenSource>,
    pool: SynthesisPool,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        token_source: Arc<dyn TokenSource>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: PipelineConfig,
    ) -> Self {
        let pool = SynthesisPool::new(synthesizer, config.synthesis_parallelism);
        Self { token_source, pool, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stream spoken audio for `prompt` into `sink`.
    ///
    /// Returns once the end frame has been written, or with an error when the
    /// token source fails (after an error frame and the end frame were
    /// written) or the connection goes away.
    pub async fn run<S>(
        &self,
        prompt: &str,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<SessionReport, SessionError>
    where
        S: FrameSink + ?Sized,
    {
        let session_id = Uuid::new_v4();
        let span = info_span!("session", session_id = %session_id);
        self.run_session(session_id, prompt, sink, cancel.child_token())
            .instrument(span)
            .await
    }

    async fn run_session<S>(
        &self,
        session_id: Uuid,
        prompt: &str,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<SessionReport, SessionError>
    where
        S: FrameSink + ?Sized,
    {
        let started = Instant::now();
        let cfg = &self.config;
        info!(prompt_len = prompt.len(), workers = self.pool.workers(), "session started");

        let (text_tx, text_rx) = mpsc::channel(cfg.text_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(cfg.result_queue_capacity);
        let (frame_tx, frame_rx) = mpsc::channel(cfg.frame_queue_capacity);

        // Every queued text segment, every worker's segment and every queued
        // result may be outstanding at once; nothing more.
        let window = SubmissionWindow::new(
            cfg.text_queue_capacity + self.pool.workers() + cfg.result_queue_capacity,
        );

        let workers = self.pool.spawn(text_rx, result_tx.clone());
        let framing = tokio::spawn(
            run_framing_stage(
                result_rx,
                frame_tx.clone(),
                Framer::new(cfg.audio_chunk_bytes),
                window.clone(),
            )
            .in_current_span(),
        );

        let stages = Stages { text_tx, result_tx, frame_tx, workers, framing, window };
        let drive = self.drive(prompt, stages, &cancel);
        let deliver = run_sender(frame_rx, sink, cancel.clone());
        let (driven, delivered) = tokio::join!(drive, deliver);

        match (driven, delivered) {
            (Ok(drained), Ok(delivery)) => {
                let report = SessionReport {
                    session_id,
                    segments: drained.submitted,
                    failed_segments: drained.framing.failed_segments,
                    frames_sent: delivery.frames_sent,
                    time_to_first_audio: delivery.first_audio_at.map(|t| t.duration_since(started)),
                    synthesis_latencies: drained
                        .workers
                        .into_iter()
                        .flat_map(|w| w.latencies)
                        .collect(),
                    elapsed: started.elapsed(),
                };
                info!(
                    segments = report.segments,
                    failed = report.failed_segments,
                    frames = report.frames_sent,
                    ttfa_ms = report.time_to_first_audio.map(|d| d.as_millis() as u64),
                    "session completed"
                );
                Ok(report)
            }
            (_, Err(DeliveryError::Cancelled)) => {
                info!("session cancelled");
                Err(SessionError::Cancelled)
            }
            (Err(SessionError::Cancelled), Err(e)) | (Ok(_), Err(e)) => {
                warn!(error = %e, "session delivery failed");
                Err(SessionError::Delivery(e))
            }
            (Err(e), _) => {
                error!(error = %e, "session failed");
                Err(e)
            }
        }
    }

    /// Feed tokens, then drain each stage in order: markers to the pool,
    /// wait for every worker, finish the framing stage, wait for it.
    async fn drive(
        &self,
        prompt: &str,
        stages: Stages,
        cancel: &CancellationToken,
    ) -> Result<Drained, SessionError> {
        let Stages { text_tx, result_tx, frame_tx, mut workers, framing, window } = stages;
        let mut framing = Some(framing);

        let outcome: Result<Drained, SessionError> = async {
            let submitted = self.feed_tokens(prompt, &text_tx, &window, cancel).await?;
            info!(submitted, "token stream finished, draining pool");

            for _ in 0..self.pool.workers() {
                send_or_cancel(&text_tx, Queued::EndOfInput, cancel).await?;
            }
            let worker_stats = join_workers(&mut workers, cancel).await?;

            send_or_cancel(&result_tx, ResultEvent::Finished { submitted }, cancel).await?;
            let handle = framing
                .as_mut()
                .ok_or_else(|| SessionError::Stage("framing stage missing".into()))?;
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                joined = handle => joined,
            };
            framing = None;
            let framing_stats = joined.map_err(|e| SessionError::Stage(e.to_string()))??;

            Ok(Drained { submitted, workers: worker_stats, framing: framing_stats })
        }
        .await;

        if let Err(ref e) = outcome {
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            if let Some(handle) = framing.take() {
                handle.abort();
                let _ = handle.await;
            }

            if !cancel.is_cancelled() && !matches!(e, SessionError::Cancelled) {
                // Frames already queued still go out, then the client is told.
                let error = Frame::SessionError { error: e.to_string() };
                if send_or_cancel(&frame_tx, error, cancel).await.is_ok() {
                    let _ = send_or_cancel(&frame_tx, Frame::End, cancel).await;
                }
            }
        }
        outcome
    }

    async fn feed_tokens(
        &self,
        prompt: &str,
        text_tx: &mpsc::Sender<Queued<TextSegment>>,
        window: &SubmissionWindow,
        cancel: &CancellationToken,
    ) -> Result<u64, SessionError> {
        let mut tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            opened = self.token_source.stream(prompt) => opened?,
        };

        let mut segmenter = Segmenter::new(self.config.min_segment_len);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                next = tokens.next() => next,
            };
            match next {
                Some(Ok(token)) => {
                    if let Some(segment) = segmenter.feed(&token) {
                        submit(text_tx, window, segment, cancel).await?;
                    }
                }
                Some(Err(e)) => return Err(SessionError::TokenSource(e)),
                None => break,
            }
        }

        if let Some(tail) = segmenter.flush() {
            submit(text_tx, window, tail, cancel).await?;
        }
        Ok(segmenter.emitted())
    }
}

/// Take a window slot for `segment`, then queue it for synthesis.
async fn submit(
    text_tx: &mpsc::Sender<Queued<TextSegment>>,
    window: &SubmissionWindow,
    segment: TextSegment,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        admitted = window.admit() => {
            admitted.map_err(|_| SessionError::Stage("submission window closed".into()))?
        }
    }
    debug!(seq = segment.seq, free = window.available(), "segment admitted");
    send_or_cancel(text_tx, Queued::Item(segment), cancel).await
}

/// Queue `item`, waiting for space unless the session is cancelled first.
async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| SessionError::Stage("downstream queue closed".into())),
    }
}

async fn join_workers(
    workers: &mut JoinSet<WorkerStats>,
    cancel: &CancellationToken,
) -> Result<Vec<WorkerStats>, SessionError> {
    let mut stats = Vec::new();
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            joined = workers.join_next() => joined,
        };
        match joined {
            Some(Ok(worker)) => stats.push(worker),
            // Its in-flight segment is reported as lost by the reorder stage.
            Some(Err(e)) => error!(error = %e, "synthesis worker died"),
            None => return Ok(stats),
        }
    }
}
