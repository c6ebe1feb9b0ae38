use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Frame, ReorderBuffer, ResultEvent, SubmissionWindow, SynthesisResult, Synthesized};

/// Slices ordered audio into fixed-size frames.
#[derive(Debug, Clone, Copy)]
pub struct Framer {
    chunk_bytes: usize,
}

impl Framer {
    pub fn new(chunk_bytes: usize) -> Self {
        Self { chunk_bytes: chunk_bytes.max(1) }
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Frames for one result. Audio shares the result's buffer; no copies.
    pub fn frames(&self, result: SynthesisResult) -> Vec<Frame> {
        let seq = result.seq;
        match result.outcome {
            Synthesized::Failed { text, error } => {
                vec![Frame::SegmentError { seq, text, error }]
            }
            Synthesized::Audio(audio) if audio.is_empty() => {
                vec![Frame::Audio { seq, sub_index: 0, payload: audio }]
            }
            Synthesized::Audio(audio) => (0..audio.len())
                .step_by(self.chunk_bytes)
                .enumerate()
                .map(|(sub_index, start)| {
                    let end = (start + self.chunk_bytes).min(audio.len());
                    Frame::Audio {
                        seq,
                        sub_index: sub_index as u32,
                        payload: audio.slice(start..end),
                    }
                })
                .collect(),
        }
    }
}

/// What the reorder/framing stage saw before it finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramingStats {
    pub segments: u64,
    pub failed_segments: u64,
    pub frames: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("result queue closed before the pool finished")]
    ResultsClosed,
    #[error("frame queue closed before the end frame was queued")]
    FramesClosed,
}

/// Reorder stage and framer as one task: consume results in completion
/// order, queue frames in sequence order, finish with exactly one end frame.
/// Each framed segment gives its slot back to `window`.
pub async fn run_framing_stage(
    mut results: mpsc::Receiver<ResultEvent>,
    frames: mpsc::Sender<Frame>,
    framer: Framer,
    window: SubmissionWindow,
) -> Result<FramingStats, FramingError> {
    let mut reorder = ReorderBuffer::new();
    let mut stats = FramingStats::default();

    while let Some(event) = results.recv().await {
        let ready = match event {
            ResultEvent::Completed(result) => {
                debug!(seq = result.seq, next = reorder.next_expected(), "synthesis result arrived");
                reorder.push(result)
            }
            ResultEvent::Finished { submitted } => {
                let rest = reorder.finish(submitted);
                for result in rest {
                    enqueue(&frames, &framer, result, &mut stats).await?;
                    window.release(1);
                }
                frames.send(Frame::End).await.map_err(|_| FramingError::FramesClosed)?;
                info!(
                    segments = stats.segments,
                    failed = stats.failed_segments,
                    frames = stats.frames,
                    "framing finished, end marker queued"
                );
                return Ok(stats);
            }
        };
        for result in ready {
            enqueue(&frames, &framer, result, &mut stats).await?;
            window.release(1);
        }
    }

    warn!(pending = reorder.pending(), "result queue closed without a finish marker");
    Err(FramingError::ResultsClosed)
}

async fn enqueue(
    frames: &mpsc::Sender<Frame>,
    framer: &Framer,
    result: SynthesisResult,
    stats: &mut FramingStats,
) -> Result<(), FramingError> {
    let seq = result.seq;
    stats.segments += 1;
    if result.is_failure() {
        stats.failed_segments += 1;
    }
    for frame in framer.frames(result) {
        frames.send(frame).await.map_err(|_| FramingError::FramesClosed)?;
        stats.frames += 1;
    }
    debug!(seq, "segment framed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn payloads(frames: &[Frame]) -> Vec<(u64, u32, Vec<u8>)> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Audio { seq, sub_index, payload } => Some((*seq, *sub_index, payload.to_vec())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_chunks_reassemble_to_original_audio() {
        let audio: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for chunk in [1usize, 7, 64, 999, 1000, 4096] {
            let frames = Framer::new(chunk).frames(SynthesisResult::audio(3, audio.clone()));
            let parts = payloads(&frames);
            assert_eq!(parts.len(), audio.len().div_ceil(chunk));
            let mut joined = Vec::new();
            for (i, (seq, sub_index, bytes)) in parts.into_iter().enumerate() {
                assert_eq!(seq, 3);
                assert_eq!(sub_index as usize, i);
                assert!(bytes.len() <= chunk);
                joined.extend(bytes);
            }
            assert_eq!(joined, audio, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_last_chunk_may_be_short() {
        let frames = Framer::new(4).frames(SynthesisResult::audio(0, vec![1u8; 10]));
        let sizes: Vec<usize> = payloads(&frames).iter().map(|p| p.2.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_error_result_becomes_single_error_frame() {
        let frames = Framer::new(4).frames(SynthesisResult::failed(2, "Hello.", "quota"));
        assert_eq!(
            frames,
            vec![Frame::SegmentError { seq: 2, text: "Hello.".into(), error: "quota".into() }]
        );
    }

    #[test]
    fn test_empty_audio_still_yields_a_frame() {
        let frames = Framer::new(4).frames(SynthesisResult::audio(5, Bytes::new()));
        assert_eq!(frames, vec![Frame::Audio { seq: 5, sub_index: 0, payload: Bytes::new() }]);
    }

    #[tokio::test]
    async fn test_stage_orders_frames_and_ends_once() {
        let (results_tx, results_rx) = mpsc::channel(8);
        let (frames_tx, mut frames_rx) = mpsc::channel(64);
        let window = SubmissionWindow::new(3);
        for _ in 0..3 {
            window.admit().await.unwrap();
        }
        let stage =
            tokio::spawn(run_framing_stage(results_rx, frames_tx, Framer::new(2), window.clone()));

        results_tx.send(ResultEvent::Completed(SynthesisResult::audio(1, vec![1u8; 3]))).await.unwrap();
        results_tx.send(ResultEvent::Completed(SynthesisResult::failed(2, "t", "e"))).await.unwrap();
        results_tx.send(ResultEvent::Completed(SynthesisResult::audio(0, vec![0u8; 2]))).await.unwrap();
        results_tx.send(ResultEvent::Finished { submitted: 3 }).await.unwrap();

        let stats = stage.await.unwrap().unwrap();
        assert_eq!(stats, FramingStats { segments: 3, failed_segments: 1, frames: 4 });
        assert_eq!(window.available(), 3);

        let mut order = Vec::new();
        while let Some(frame) = frames_rx.recv().await {
            order.push(match frame {
                Frame::Audio { seq, sub_index, .. } => format!("{seq}.{sub_index}"),
                Frame::SegmentError { seq, .. } => format!("{seq}!"),
                Frame::SessionError { .. } => "fatal".to_string(),
                Frame::End => "end".to_string(),
            });
        }
        assert_eq!(order, vec!["0.0", "1.0", "1.1", "2!", "end"]);
    }

    #[tokio::test]
    async fn test_stage_errors_when_results_close_early() {
        let (results_tx, results_rx) = mpsc::channel(1);
        let (frames_tx, _frames_rx) = mpsc::channel(1);
        drop(results_tx);
        let err = run_framing_stage(results_rx, frames_tx, Framer::new(8), SubmissionWindow::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::ResultsClosed));
    }
}
