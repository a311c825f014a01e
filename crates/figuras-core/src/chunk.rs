//! Document chunks and the windowing that produces them.
//!
//! Long speeches are annotated in overlapping windows. Each [`Chunk`]
//! remembers where it starts in the document (`global_offset`, in
//! characters) so its spans can be remapped independently of the others.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChunkingConfig;

/// A contiguous slice of a document sent to the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier unique across the corpus (e.g., "1234-c0")
    pub chunk_id: String,

    /// Document the chunk belongs to
    pub document_id: String,

    /// Position of the chunk within its document
    pub index: usize,

    /// Character offset of the chunk's first character in the document
    pub global_offset: usize,

    /// Chunk text
    pub text: String,

    /// Length of `text` in characters
    char_len: usize,
}

impl Chunk {
    /// Create a chunk. The id is derived from the document id and index.
    pub fn new(
        document_id: impl Into<String>,
        index: usize,
        global_offset: usize,
        text: impl Into<String>,
    ) -> Self {
        let document_id = document_id.into();
        let text = text.into();
        Self {
            chunk_id: chunk_id(&document_id, index),
            char_len: text.chars().count(),
            document_id,
            index,
            global_offset,
            text,
        }
    }

    /// Length in characters; the chunk's local range is `[0, len)`.
    pub fn len(&self) -> usize {
        self.char_len
    }

    /// True for an empty chunk.
    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    /// Document-global character range covered by this chunk.
    pub fn global_range(&self) -> std::ops::Range<usize> {
        self.global_offset..self.global_offset + self.char_len
    }
}

/// Build the id of chunk `index` of `document_id`.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{}-c{}", document_id, index)
}

/// Splits documents into overlapping character windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    /// Create a chunker. `overlap_chars` is capped below `max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: overlap_chars.min(max_chars - 1),
        }
    }

    /// Split `text` into chunks.
    ///
    /// A window prefers to end right after whitespace found in its last
    /// quarter, so words are not cut when avoidable. Consecutive windows
    /// share `overlap_chars` characters. Empty text yields no chunks.
    pub fn split(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();

        if total == 0 {
            return chunks;
        }

        let min_window = (self.max_chars * 3 / 4).max(1);
        let mut start = 0;

        loop {
            let hard_end = (start + self.max_chars).min(total);
            let end = if hard_end == total {
                total
            } else {
                ((start + min_window)..hard_end)
                    .rev()
                    .find(|&p| chars[p - 1].is_whitespace())
                    .unwrap_or(hard_end)
            };

            let slice: String = chars[start..end].iter().collect();
            chunks.push(Chunk::new(document_id, chunks.len(), start, slice));

            if end == total {
                break;
            }

            start = end.saturating_sub(self.overlap_chars).max(start + 1);
        }

        debug!(
            document_id,
            chars = total,
            chunks = chunks.len(),
            "Split document into chunks"
        );

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

impl From<&ChunkingConfig> for Chunker {
    fn from(config: &ChunkingConfig) -> Self {
        Self::new(config.max_chars, config.overlap_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = Chunker::new(100, 10).split("42", "Senhor Presidente");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "42-c0");
        assert_eq!(chunks[0].global_offset, 0);
        assert_eq!(chunks[0].text, "Senhor Presidente");
    }

    #[test]
    fn test_empty_document_no_chunks() {
        assert!(Chunker::new(100, 10).split("42", "").is_empty());
    }

    #[test]
    fn test_chunks_cover_document_with_overlap() {
        let text = "palavra ".repeat(50);
        let chunks = Chunker::new(60, 10).split("7", &text);
        assert!(chunks.len() > 1);

        let total = text.chars().count();
        assert_eq!(chunks[0].global_offset, 0);
        assert_eq!(chunks.last().unwrap().global_range().end, total);

        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(b.global_offset > a.global_offset);
            assert!(b.global_offset <= a.global_range().end);
        }
    }

    #[test]
    fn test_chunk_text_matches_document_slice() {
        let text = "A esperança é a última que morre, senhoras e senhores. ".repeat(10);
        let chunks = Chunker::new(40, 8).split("9", &text);
        for chunk in &chunks {
            let expected: String = text
                .chars()
                .skip(chunk.global_offset)
                .take(chunk.len())
                .collect();
            assert_eq!(chunk.text, expected);
        }
    }

    #[test]
    fn test_prefers_whitespace_boundary() {
        let text = "aaaa bbbb cccc dddd";
        let chunks = Chunker::new(12, 0).split("1", text);
        assert_eq!(chunks[0].text, "aaaa bbbb ");
    }

    #[test]
    fn test_overlap_capped_below_window() {
        let chunks = Chunker::new(5, 50).split("1", "abcdefghij");
        assert_eq!(chunks.last().unwrap().global_range().end, 10);
    }
}
