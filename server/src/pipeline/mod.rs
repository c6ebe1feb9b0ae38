//! The per-request streaming pipeline.
//!
//! TokenSource → [`Segmenter`] → text queue → [`SynthesisPool`] → result queue
//! → [`ReorderBuffer`] + [`Framer`] → frame queue → sender → connection.

pub mod delivery;
pub mod framer;
pub mod reorder;
pub mod segmenter;
pub mod session;
pub mod synthesis;

use bytes::Bytes;

pub use delivery::{DeliveryError, DeliveryStats, FrameSink};
pub use framer::Framer;
pub use reorder::{ReorderBuffer, SubmissionWindow};
pub use segmenter::Segmenter;
pub use session::{Orchestrator, SessionError, SessionReport};
pub use synthesis::{SynthesisPool, WorkerStats};

/// A span of generated text chosen as one synthesis unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Synthesized {
    Audio(Bytes),
    Failed { text: String, error: String },
}

/// Outcome of synthesizing one segment. Exactly one exists per segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisResult {
    pub seq: u64,
    pub outcome: Synthesized,
}

impl SynthesisResult {
    pub fn audio(seq: u64, audio: impl Into<Bytes>) -> Self {
        Self { seq, outcome: Synthesized::Audio(audio.into()) }
    }

    pub fn failed(seq: u64, text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            seq,
            outcome: Synthesized::Failed { text: text.into(), error: error.into() },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Synthesized::Failed { .. })
    }
}

/// One deliverable unit on the frame queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Audio { seq: u64, sub_index: u32, payload: Bytes },
    SegmentError { seq: u64, text: String, error: String },
    /// The session itself failed; always followed by [`Frame::End`].
    SessionError { error: String },
    End,
}

impl Frame {
    pub fn is_end(&self) -> bool {
        matches!(self, Frame::End)
    }
}

/// Item on a queue whose consumers stop on an explicit marker rather than on
/// the channel closing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Queued<T> {
    Item(T),
    EndOfInput,
}

/// Item on the result queue feeding the reorder stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultEvent {
    Completed(SynthesisResult),
    /// No more results will arrive; `submitted` segments were handed to the pool.
    Finished { submitted: u64 },
}
