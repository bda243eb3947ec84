//! Incremental sentence segmentation of the generation stream.
//!
//! Synthesis is called per sentence-like unit rather than per token:
//! sentences pipeline with generation while avoiding sub-sentence
//! fragments that sound unnatural when spoken. A boundary is terminal
//! punctuation followed by whitespace, so `"3.5 lakhs"` does not split
//! on the decimal point.

use std::sync::LazyLock;

use regex::Regex;

static BOUNDARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?;\n]+\s+").expect("sentence boundary regex"));

/// Buffers text deltas and yields complete sentence units
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one delta and drain any sentence units it completed.
    /// Chunking boundaries do not matter: the same concatenated input
    /// yields the same units regardless of how it was split.
    pub fn consume(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut units = Vec::new();
        while let Some(m) = BOUNDARY_RE.find(&self.buffer) {
            let unit = self.buffer[..m.end()].trim().to_string();
            self.buffer.drain(..m.end());
            if !unit.is_empty() {
                units.push(unit);
            }
        }
        units
    }

    /// Flush the remainder on clean stream end. Cancelled turns skip
    /// this, discarding the trailing fragment.
    pub fn finish(&mut self) -> Option<String> {
        let remainder = self.buffer.trim().to_string();
        self.buffer.clear();
        (!remainder.is_empty()).then_some(remainder)
    }
}
