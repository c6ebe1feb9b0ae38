use tracing::debug;

use super::TextSegment;

/// Separators in priority order. A higher-priority separator wins even when a
/// lower-priority one occurs earlier in the buffer.
pub const SEPARATORS: [&str; 6] = [". ", "? ", "! ", "; ", ": ", ", "];

/// Splits a token stream into sequence-numbered text segments.
///
/// Lengths are counted in characters. A cut is made right after the first
/// separator found at or beyond `min_len`; without one, a buffer that reaches
/// `2 * min_len` is emitted whole.
#[derive(Debug)]
pub struct Segmenter {
    buffer: String,
    min_len: usize,
    next_seq: u64,
}

impl Segmenter {
    pub fn new(min_len: usize) -> Self {
        Self { buffer: String::new(), min_len, next_seq: 0 }
    }

    /// Number of segments emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_seq
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Append a token; returns at most one completed segment.
    pub fn feed(&mut self, token: &str) -> Option<TextSegment> {
        self.buffer.push_str(token);

        loop {
            let cut = self.find_cut()?;
            let rest = self.buffer.split_off(cut);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            if let Some(segment) = self.emit(&chunk) {
                return Some(segment);
            }
            // all-whitespace cut, keep looking in what is left
        }
    }

    /// Emit whatever is buffered once the token stream has ended.
    pub fn flush(&mut self) -> Option<TextSegment> {
        let tail = std::mem::take(&mut self.buffer);
        let segment = self.emit(&tail);
        if let Some(ref s) = segment {
            debug!(seq = s.seq, len = s.text.len(), "flushing tail segment");
        }
        segment
    }

    fn find_cut(&self) -> Option<usize> {
        if let Some(start) = byte_offset_of_char(&self.buffer, self.min_len) {
            let window = &self.buffer[start..];
            for sep in SEPARATORS {
                if let Some(idx) = window.find(sep) {
                    return Some(start + idx + sep.len());
                }
            }
        }

        if self.buffer.chars().count() >= self.min_len.saturating_mul(2) && !self.buffer.is_empty() {
            return Some(self.buffer.len());
        }
        None
    }

    fn emit(&mut self, chunk: &str) -> Option<TextSegment> {
        let text = chunk.trim();
        if text.is_empty() {
            return None;
        }
        let segment = TextSegment { seq: self.next_seq, text: text.to_string() };
        self.next_seq += 1;
        debug!(seq = segment.seq, len = segment.text.len(), "segment ready");
        Some(segment)
    }
}

/// Byte offset of the `n`th character, or `None` when the string is shorter.
fn byte_offset_of_char(s: &str, n: usize) -> Option<usize> {
    if n == 0 {
        return Some(0);
    }
    s.char_indices().nth(n).map(|(i, _)| i)
}
