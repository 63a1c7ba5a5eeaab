//! Overlapping, boundary-aware text segmenter.
//!
//! Splits a [`Document`] into [`Chunk`]s of at most `chunk_size` characters,
//! where every pair of adjacent chunks shares exactly `chunk_overlap`
//! characters (the tail of one is the head of the next). Chunk text is an
//! untrimmed slice of the document, so dropping the first `chunk_overlap`
//! characters of every chunk after the first and concatenating rebuilds the
//! original text exactly.
//!
//! # Algorithm
//!
//! 1. Convert token limits to characters using a 4 chars/token ratio.
//! 2. Starting at `start`, if the rest of the document fits in `chunk_size`
//!    characters, emit it as the final chunk.
//! 3. Otherwise look for a cut point inside
//!    `(max(start + overlap, start + chunk_size / 2), start + chunk_size]`,
//!    preferring in order: paragraph break (`\n\n`), sentence end
//!    (`.`, `!`, `?` followed by whitespace), line break, any whitespace.
//!    The latest cut of the best kind wins. Without any, cut hard at
//!    `start + chunk_size`.
//! 4. The next chunk starts `chunk_overlap` characters before the cut.
//!
//! Empty documents yield no chunks.
//!
//! # Example
//!
//! ```rust
//! use vignette_rag_core::chunk::Segmenter;
//! use vignette_rag_core::models::Document;
//!
//! let segmenter = Segmenter::new(700, 100).unwrap();
//! let doc = Document::new("doc-123", "Hello world.\n\nSecond paragraph.");
//! let chunks: Vec<_> = segmenter.segment(&doc).collect();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::ChunkingError;
use crate::models::{Chunk, Document};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Splits documents into overlapping chunks. Cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Segmenter {
    /// Create a segmenter measuring `chunk_size` and `chunk_overlap` in characters.
    ///
    /// # Errors
    ///
    /// `chunk_size` must be positive and `chunk_overlap` strictly smaller.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Create a segmenter from token budgets (`× CHARS_PER_TOKEN`).
    pub fn from_tokens(max_tokens: usize, overlap_tokens: usize) -> Result<Self, ChunkingError> {
        Self::new(
            max_tokens * CHARS_PER_TOKEN,
            overlap_tokens * CHARS_PER_TOKEN,
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily segment one document. Calling again restarts from the beginning.
    pub fn segment<'a>(&self, document: &'a Document) -> Segments<'a> {
        let mut offsets: Vec<usize> = document.text.char_indices().map(|(i, _)| i).collect();
        offsets.push(document.text.len());
        Segments {
            document_id: &document.id,
            text: &document.text,
            offsets: offsets.into(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            start: 0,
            next_index: 0,
            done: document.text.is_empty(),
        }
    }

    /// Segment every document in order. Chunks never span documents.
    pub fn segment_all(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|d| self.segment(d)).collect()
    }
}

/// Iterator over the chunks of one document, see [`Segmenter::segment`].
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    document_id: &'a str,
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    offsets: Arc<[usize]>,
    chunk_size: usize,
    chunk_overlap: usize,
    start: usize,
    next_index: usize,
    done: bool,
}

/// Cut-point preference, higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Whitespace,
    Line,
    Sentence,
    Paragraph,
}

impl Segments<'_> {
    fn char_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn char_at(&self, i: usize) -> Option<char> {
        self.text[self.offsets[i]..].chars().next()
    }

    /// Classify a cut placed before char `end` (i.e. after `end - 1`).
    fn boundary_at(&self, end: usize) -> Option<Boundary> {
        let last = self.char_at(end - 1)?;
        if !last.is_whitespace() {
            return None;
        }
        let prev = if end >= 2 { self.char_at(end - 2) } else { None };
        if last == '\n' {
            return Some(match prev {
                Some('\n') => Boundary::Paragraph,
                _ => Boundary::Line,
            });
        }
        match prev {
            Some('.' | '!' | '?') => Some(Boundary::Sentence),
            _ => Some(Boundary::Whitespace),
        }
    }

    fn find_cut(&self, start: usize, hard_end: usize) -> usize {
        let floor = (start + self.chunk_overlap).max(start + self.chunk_size / 2);
        let mut best: Option<(Boundary, usize)> = None;
        for end in (floor + 1..=hard_end).rev() {
            let Some(kind) = self.boundary_at(end) else {
                continue;
            };
            if best.map_or(true, |(b, _)| kind > b) {
                best = Some((kind, end));
                if kind == Boundary::Paragraph {
                    break;
                }
            }
        }
        best.map(|(_, end)| end).unwrap_or(hard_end)
    }
}

impl Iterator for Segments<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let total = self.char_count();
        let start = self.start;
        let hard_end = (start + self.chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            self.find_cut(start, hard_end)
        };

        let chunk = make_chunk(
            self.document_id,
            self.next_index,
            start..end,
            &self.text[self.offsets[start]..self.offsets[end]],
        );

        self.next_index += 1;
        if end == total {
            self.done = true;
        } else {
            self.start = end - self.chunk_overlap;
        }
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Segments<'_> {}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    document_id: &str,
    index: usize,
    char_range: std::ops::Range<usize>,
    text: &str,
) -> Chunk {
    Chunk {
        id: sha256_hex(&format!("{}:{}", document_id, index)),
        document_id: document_id.to_string(),
        chunk_index: index,
        char_range,
        text: text.to_string(),
        hash: sha256_hex(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("doc1", text)
    }

    fn rebuild(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_small_text_single_chunk() {
        let s = Segmenter::new(100, 10).unwrap();
        let chunks: Vec<_> = s.segment(&doc("Hello, world!")).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].char_range, 0..13);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let s = Segmenter::new(100, 10).unwrap();
        assert_eq!(s.segment(&doc("")).count(), 0);
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(Segmenter::new(0, 0), Err(ChunkingError::ZeroChunkSize));
        assert!(matches!(
            Segmenter::new(10, 10),
            Err(ChunkingError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn test_from_tokens() {
        let s = Segmenter::from_tokens(512, 128).unwrap();
        assert_eq!(s.chunk_size(), 2048);
        assert_eq!(s.chunk_overlap(), 512);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = "First paragraph is here.\n\nSecond paragraph follows. It is longer than the first one.";
        let s = Segmenter::new(40, 4).unwrap();
        let chunks: Vec<_> = s.segment(&doc(text)).collect();
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].text, "First paragraph is here.\n\n");
    }

    #[test]
    fn test_prefers_sentence_over_word() {
        let text = "One two three. Four five six seven eight nine ten eleven";
        let s = Segmenter::new(24, 0).unwrap();
        let chunks: Vec<_> = s.segment(&doc(text)).collect();
        assert_eq!(chunks[0].text, "One two three. ");
    }

    #[test]
    fn test_adjacent_chunks_share_exact_overlap() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} talks about thrombolysis.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let s = Segmenter::new(120, 30).unwrap();
        let chunks: Vec<_> = s.segment(&doc(&text)).collect();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].char_len() - 30)
                .collect();
            let head: String = pair[1].text.chars().take(30).collect();
            assert_eq!(tail, head);
            assert_eq!(pair[0].char_range.end - 30, pair[1].char_range.start);
        }
        assert_eq!(rebuild(&chunks, 30), text);
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let s = Segmenter::new(40, 8).unwrap();
        for (i, c) in s.segment(&doc(&text)).enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let s = Segmenter::new(12, 3).unwrap();
        let chunks: Vec<_> = s.segment(&doc(text)).collect();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.text.is_empty());
            assert!(c.char_len() <= 12);
        }
        assert_eq!(rebuild(&chunks, 3), text);
    }

    #[test]
    fn test_restartable_and_deterministic() {
        let d = doc("Alpha beta.\n\nGamma delta.\n\nEpsilon zeta eta theta.");
        let s = Segmenter::new(16, 4).unwrap();
        let iter = s.segment(&d);
        let a: Vec<_> = iter.clone().collect();
        let b: Vec<_> = iter.collect();
        let c: Vec<_> = s.segment(&d).collect();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_documents_never_merge() {
        let docs = vec![Document::new("a", "short a"), Document::new("b", "short b")];
        let s = Segmenter::new(100, 10).unwrap();
        let chunks = s.segment_all(&docs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].document_id, "a");
        assert_eq!(chunks[1].document_id, "b");
        assert_ne!(chunks[0].id, chunks[1].id);
    }
}
