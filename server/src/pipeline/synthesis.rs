use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::FutureExt;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tracing::{debug, error, info, Instrument};
use tts_core::SpeechSynthesizer;

use super::{Queued, ResultEvent, SynthesisResult, TextSegment};

/// What one worker did before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker: usize,
    pub processed: u64,
    pub failed: u64,
    pub latencies: Vec<Duration>,
    /// `false` when the worker stopped because its queue closed rather than
    /// on an end-of-input marker.
    pub acknowledged_end: bool,
}

/// Fixed set of workers sharing one text queue and one result queue.
#[derive(Clone)]
pub struct SynthesisPool {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    workers: usize,
}

impl SynthesisPool {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, workers: usize) -> Self {
        Self { synthesizer, workers: workers.max(1) }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the workers. Each stops after taking one [`Queued::EndOfInput`],
    /// so the producer must send one marker per worker.
    pub fn spawn(
        &self,
        input: mpsc::Receiver<Queued<TextSegment>>,
        output: mpsc::Sender<ResultEvent>,
    ) -> JoinSet<WorkerStats> {
        let input = Arc::new(Mutex::new(input));
        let mut set = JoinSet::new();
        for worker in 0..self.workers {
            let span = tracing::debug_span!("tts_worker", worker);
            set.spawn(
                run_worker(worker, self.synthesizer.clone(), input.clone(), output.clone())
                    .instrument(span),
            );
        }
        set
    }
}

async fn run_worker(
    worker: usize,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    input: Arc<Mutex<mpsc::Receiver<Queued<TextSegment>>>>,
    output: mpsc::Sender<ResultEvent>,
) -> WorkerStats {
    let mut stats = WorkerStats { worker, ..Default::default() };
    debug!("worker started");

    loop {
        // The lock is only held while waiting for the next item.
        let item = input.lock().await.recv().await;
        let segment = match item {
            Some(Queued::Item(segment)) => segment,
            Some(Queued::EndOfInput) => {
                stats.acknowledged_end = true;
                debug!(processed = stats.processed, "end of input, worker exiting");
                break;
            }
            None => {
                debug!("text queue closed, worker exiting");
                break;
            }
        };

        let started = Instant::now();
        let (seq, text) = (segment.seq, segment.text.clone());
        let result = match AssertUnwindSafe(synthesize_segment(synthesizer.as_ref(), segment))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(seq, reason = %reason, "synthesizer panicked");
                SynthesisResult::failed(seq, text, format!("synthesis panicked: {reason}"))
            }
        };
        stats.latencies.push(started.elapsed());
        stats.processed += 1;
        if result.is_failure() {
            stats.failed += 1;
        }

        if output.send(ResultEvent::Completed(result)).await.is_err() {
            debug!("result queue closed, worker exiting");
            break;
        }
    }
    stats
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One synthesis call. Failures become data; they never escape the pool.
pub async fn synthesize_segment(
    synthesizer: &dyn SpeechSynthesizer,
    segment: TextSegment,
) -> SynthesisResult {
    let TextSegment { seq, text } = segment;
    debug!(seq, len = text.len(), "synthesizing segment");
    match synthesizer.synthesize(&text).await {
        Ok(audio) => {
            info!(seq, bytes = audio.len(), "segment synthesized");
            SynthesisResult::audio(seq, audio)
        }
        Err(e) => {
            error!(seq, error = %e, "segment synthesis failed");
            SynthesisResult::failed(seq, text, e.to_string())
        }
    }
}
