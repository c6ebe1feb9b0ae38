use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{AcquireError, Semaphore};
use tracing::warn;

use super::SynthesisResult;

/// Restores submission order over out-of-order synthesis completions.
///
/// Holds at most as many results as there are segments in flight; the
/// session caps that with a [`SubmissionWindow`].
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next: u64,
    pending: BTreeMap<u64, SynthesisResult>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number that must arrive before anything else is released.
    pub fn next_expected(&self) -> u64 {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffer one result and release every result that is now contiguous.
    pub fn push(&mut self, result: SynthesisResult) -> Vec<SynthesisResult> {
        if result.seq < self.next || self.pending.contains_key(&result.seq) {
            warn!(seq = result.seq, next = self.next, "discarding duplicate synthesis result");
            return Vec::new();
        }
        self.pending.insert(result.seq, result);

        let mut ready = Vec::new();
        while let Some(result) = self.pending.remove(&self.next) {
            ready.push(result);
            self.next += 1;
        }
        ready
    }

    /// Release everything once no more results will arrive.
    ///
    /// Segments below `submitted` that never produced a result are reported
    /// as failures so the client still hears about every segment.
    pub fn finish(&mut self, submitted: u64) -> Vec<SynthesisResult> {
        let mut out = Vec::new();
        while self.next < submitted {
            let seq = self.next;
            match self.pending.remove(&seq) {
                Some(result) => out.push(result),
                None => {
                    warn!(seq, "segment produced no synthesis result");
                    out.push(SynthesisResult::failed(seq, "", "synthesis result lost"));
                }
            }
            self.next += 1;
        }

        let stray = std::mem::take(&mut self.pending);
        for (seq, result) in stray {
            warn!(seq, submitted, "result for a segment that was never submitted");
            out.push(result);
            self.next = seq + 1;
        }
        out
    }
}

/// Caps the segments that have been submitted but not yet framed.
///
/// The producer admits a slot before queueing each segment; the framing
/// stage releases one for every result it hands to the framer. A slow head
/// segment therefore stalls submission instead of filling the reorder buffer.
#[derive(Debug, Clone)]
pub struct SubmissionWindow {
    slots: Arc<Semaphore>,
    size: usize,
}

impl SubmissionWindow {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { slots: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot and take it.
    pub async fn admit(&self) -> Result<(), AcquireError> {
        self.slots.acquire().await?.forget();
        Ok(())
    }

    /// Return the slots of `n` framed segments.
    pub fn release(&self, n: usize) {
        self.slots.add_permits(n);
    }
}
