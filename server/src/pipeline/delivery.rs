use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Frame;
use crate::protocol::OutboundMessage;

/// How long a cancelled sender may spend on its final end marker.
const END_MARKER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("connection write failed: {0}")]
    Write(String),
    #[error("delivery cancelled")]
    Cancelled,
    #[error("frame queue closed before the end frame")]
    QueueClosed,
}

/// Write half of a connection. Messages are already serialized JSON text.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError>;
}

/// Channel-backed sink, used to bridge a session to another task.
#[async_trait]
impl FrameSink for mpsc::Sender<String> {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError> {
        self.send(text).await.map_err(|_| DeliveryError::Closed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    pub frames_sent: u64,
    pub audio_frames: u64,
    pub error_frames: u64,
    pub first_audio_at: Option<Instant>,
}

/// Write frames in queue order until the end frame has been written.
///
/// A failed write cancels `cancel` so the rest of the session stops. When
/// cancelled from outside, one best-effort end frame is written before
/// returning. A write blocked on a stalled peer is abandoned on cancel.
pub async fn run_sender<S>(
    mut frames: mpsc::Receiver<Frame>,
    sink: &mut S,
    cancel: CancellationToken,
) -> Result<DeliveryStats, DeliveryError>
where
    S: FrameSink + ?Sized,
{
    let mut stats = DeliveryStats::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("sender cancelled, attempting end marker");
                let end = sink.send_text(OutboundMessage::end().to_json());
                if tokio::time::timeout(END_MARKER_GRACE, end).await.is_err() {
                    debug!("end marker write timed out");
                }
                return Err(DeliveryError::Cancelled);
            }
            frame = frames.recv() => frame,
        };

        let Some(frame) = frame else {
            warn!(sent = stats.frames_sent, "frame queue closed before end marker");
            return Err(DeliveryError::QueueClosed);
        };

        let is_end = frame.is_end();
        let text = OutboundMessage::from(&frame).to_json();
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("sender cancelled during a write");
                return Err(DeliveryError::Cancelled);
            }
            written = sink.send_text(text) => written,
        };
        if let Err(e) = written {
            warn!(error = %e, "connection write failed, cancelling session");
            cancel.cancel();
            return Err(e);
        }

        stats.frames_sent += 1;
        match &frame {
            Frame::Audio { seq, sub_index, payload } => {
                stats.audio_frames += 1;
                if stats.first_audio_at.is_none() {
                    stats.first_audio_at = Some(Instant::now());
                }
                debug!(seq, sub_index, bytes = payload.len(), "audio frame sent");
            }
            Frame::SegmentError { seq, .. } => {
                stats.error_frames += 1;
                debug!(seq, "segment error frame sent");
            }
            Frame::SessionError { .. } => stats.error_frames += 1,
            Frame::End => {}
        }

        if is_end {
            info!(frames = stats.frames_sent, "end marker sent");
            return Ok(stats);
        }
    }
}
