//! Splitting medical records into overlapping, traceable chunks.
//!
//! A [`MedicalRecord`] is rendered into one labelled document (question,
//! reasoning, answer) and then cut into chunks of at most
//! [`ChunkConfig::max_chars`] characters. Splitting is recursive: the text is
//! first broken on the coarsest delimiter (paragraph breaks), and any piece
//! that is still too large is broken again on the next finer delimiter, down
//! to a hard character split when no delimiter is left.
//!
//! The resulting atomic segments are then merged greedily into chunks. When a
//! chunk is full, the next one starts with the trailing segments of the
//! previous chunk, up to [`ChunkConfig::overlap_chars`] characters, so that
//! sentences near a boundary are seen in context by the embedding model.
//!
//! All lengths are counted in Unicode scalar values, not bytes, so text mixing
//! Chinese and English is split on character boundaries.
//!
//! # Guarantees
//!
//! *   Every chunk is at most `max_chars` characters long.
//! *   Chunks are contiguous: chunk `n + 1` starts at or before the end of chunk
//!     `n`, so removing the overlaps reconstructs the whole document.
//! *   Adjacent chunks share at most `overlap_chars` characters.
//! *   Output is deterministic for a given record and configuration.
//!
//! # Usage
//!
//! ```
//! use medrag_context::{ChunkConfig, MedicalRecord, RecordChunker};
//!
//! let chunker = RecordChunker::new(ChunkConfig::new(200, 40).unwrap()).unwrap();
//! let record = MedicalRecord::new(
//!     "What are the early signs of dehydration in infants?",
//!     "Infants lose fluid quickly. Look at wet diapers, tears and the fontanelle.",
//!     "Fewer wet diapers, no tears when crying and a sunken soft spot.",
//! );
//!
//! let chunks = chunker.chunk(7, &record, "medical_dataset");
//! assert!(!chunks.is_empty());
//! assert_eq!(chunks[0].id, "7_0");
//! assert!(chunks.iter().all(|c| c.chunk_text.chars().count() <= 200));
//! ```

use crate::record::MedicalRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;

/// Delimiters used to split medical documents, coarsest first.
///
/// - `\n\n`: section and paragraph breaks.
/// - `\n`: line breaks.
/// - `[。！？；]`: CJK sentence and clause enders.
/// - `[.!?;]\s+`: Latin sentence enders followed by whitespace.
/// - `\s+`: any whitespace run.
///
/// Each delimiter stays attached to the text before it. When none of them can
/// bring a piece under the size limit the piece is split every `max_chars`
/// characters.
pub const MEDICAL_DELIMITERS: &[&str] = &[
    r"\n\n",       // Paragraphs
    r"\n",         // Line breaks
    r"[。！？；]", // CJK sentence enders
    r"[.!?;]\s+",  // Latin sentence enders
    r"\s+",        // Whitespace
];

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Errors raised while configuring a [`RecordChunker`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkConfigError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },

    #[error("invalid delimiter pattern {pattern:?}: {message}")]
    InvalidDelimiter { pattern: String, message: String },
}

/// Size parameters for chunking, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Upper bound on the length of every chunk.
    pub max_chars: usize,
    /// Upper bound on the text shared by two adjacent chunks.
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_SIZE,
            overlap_chars: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Create a validated configuration.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ChunkConfigError> {
        let config = Self {
            max_chars,
            overlap_chars,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChunkConfigError> {
        if self.max_chars == 0 {
            return Err(ChunkConfigError::ZeroChunkSize);
        }
        if self.overlap_chars >= self.max_chars {
            return Err(ChunkConfigError::OverlapTooLarge {
                size: self.max_chars,
                overlap: self.overlap_chars,
            });
        }
        Ok(())
    }
}

/// One retrievable chunk of a medical record.
///
/// Chunks are created once at index build time and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChunk {
    /// Stable identifier, `"{record_index}_{chunk_index}"`.
    pub id: String,
    /// Position of the source record in the dataset.
    pub record_index: usize,
    /// 0-based position of this chunk within its record.
    pub chunk_index: usize,
    /// The chunk content.
    pub chunk_text: String,
    /// Name of the dataset the record came from.
    pub source: String,
    /// Truncated question of the source record, for citations.
    pub original_question_preview: String,
    /// Character offset of the chunk start within the record document.
    pub char_start: usize,
    /// Character offset one past the chunk end within the record document.
    pub char_end: usize,
}

/// Build the identifier of a chunk from its record and chunk positions.
pub fn chunk_id(record_index: usize, chunk_index: usize) -> String {
    format!("{record_index}_{chunk_index}")
}

/// Splits records into chunks according to a [`ChunkConfig`] and an ordered
/// list of delimiter patterns.
#[derive(Debug, Clone)]
pub struct RecordChunker {
    config: ChunkConfig,
    delimiters: Vec<Regex>,
}

impl RecordChunker {
    /// Create a chunker using [`MEDICAL_DELIMITERS`].
    pub fn new(config: ChunkConfig) -> Result<Self, ChunkConfigError> {
        Self::with_delimiters(config, MEDICAL_DELIMITERS)
    }

    /// Create a chunker with custom delimiter patterns.
    ///
    /// Patterns are regular expressions applied in order, from most significant
    /// to least significant. Patterns that can match the empty string are
    /// rejected because they would not make progress.
    pub fn with_delimiters<S: AsRef<str>>(
        config: ChunkConfig,
        patterns: &[S],
    ) -> Result<Self, ChunkConfigError> {
        config.validate()?;

        let delimiters = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                let regex =
                    Regex::new(pattern).map_err(|e| ChunkConfigError::InvalidDelimiter {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })?;
                if regex.is_match("") {
                    return Err(ChunkConfigError::InvalidDelimiter {
                        pattern: pattern.to_string(),
                        message: "pattern matches the empty string".to_string(),
                    });
                }
                Ok(regex)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { config, delimiters })
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// Split one record into chunks.
    ///
    /// Missing fields are treated as empty, and the section labels mean at
    /// least one chunk is always produced.
    pub fn chunk(
        &self,
        record_index: usize,
        record: &MedicalRecord,
        source: &str,
    ) -> Vec<RecordChunk> {
        let document = record.document();
        let preview = record.question_preview();

        self.split_text(&document)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, range)| {
                let char_start = document[..range.start].chars().count();
                let chunk_text = document[range].to_string();
                let char_end = char_start + chunk_text.chars().count();
                RecordChunk {
                    id: chunk_id(record_index, chunk_index),
                    record_index,
                    chunk_index,
                    chunk_text,
                    source: source.to_string(),
                    original_question_preview: preview.clone(),
                    char_start,
                    char_end,
                }
            })
            .collect()
    }

    /// Split arbitrary text into chunk byte ranges.
    ///
    /// Ranges always fall on character boundaries of `text`.
    pub fn split_text(&self, text: &str) -> Vec<Range<usize>> {
        let segments = self.split_recursively_into_segments(text, 0..text.len(), 0);
        self.merge_segments(text, segments)
    }

    // Breaks `text[range]` into contiguous segments of at most max_chars
    // characters, trying delimiters from `delimiter_idx` onwards.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        range: Range<usize>,
        delimiter_idx: usize,
    ) -> Vec<Range<usize>> {
        let slice = &text[range.clone()];
        if slice.is_empty() {
            return Vec::new();
        }
        if slice.chars().count() <= self.config.max_chars {
            return vec![range];
        }

        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            return hard_split(text, range, self.config.max_chars);
        };

        let mut pieces = Vec::new();
        let mut start = range.start;
        for mat in delimiter.find_iter(slice) {
            let end = range.start + mat.end();
            if end > start {
                pieces.push(start..end);
                start = end;
            }
        }
        if start < range.end {
            pieces.push(start..range.end);
        }

        if pieces.len() <= 1 {
            return self.split_recursively_into_segments(text, range, delimiter_idx + 1);
        }

        pieces
            .into_iter()
            .flat_map(|piece| self.split_recursively_into_segments(text, piece, delimiter_idx + 1))
            .collect()
    }

    fn merge_segments(&self, text: &str, segments: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let max_chars = self.config.max_chars;
        let overlap_chars = self.config.overlap_chars;

        let mut chunks = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut window_chars = 0;

        for segment in segments {
            let segment_chars = text[segment.clone()].chars().count();

            if window_chars + segment_chars > max_chars && !window.is_empty() {
                chunks.extend(window_span(&window));
                // Keep a tail of the finished chunk as overlap for the next one.
                while window_chars > overlap_chars
                    || (window_chars > 0 && window_chars + segment_chars > max_chars)
                {
                    match window.pop_front() {
                        Some((_, popped)) => window_chars -= popped,
                        None => break,
                    }
                }
            }

            window_chars += segment_chars;
            window.push_back((segment, segment_chars));
        }

        chunks.extend(window_span(&window));
        chunks
    }
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Option<Range<usize>> {
    Some(window.front()?.0.start..window.back()?.0.end)
}

fn hard_split(text: &str, range: Range<usize>, max_chars: usize) -> Vec<Range<usize>> {
    let mut segments = Vec::new();
    let mut start = range.start;
    for (count, (offset, _)) in text[range.clone()].char_indices().enumerate() {
        if count > 0 && count % max_chars == 0 {
            let boundary = range.start + offset;
            segments.push(start..boundary);
            start = boundary;
        }
    }
    if start < range.end {
        segments.push(start..range.end);
    }
    segments
}
