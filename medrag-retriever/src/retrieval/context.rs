//! Turns ranked chunks into a bounded context block for an answer generator.

use crate::retrieval::retriever::RetrievedChunk;
use serde::Serialize;

pub const DEFAULT_SEPARATOR: &str = "\n\n";

/// Where an included chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub record_index: usize,
    pub source: String,
    pub original_question_preview: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub context_text: String,
    /// One entry per included chunk, in inclusion order
    pub sources: Vec<SourceRef>,
    /// Length of `context_text` in characters, separators included
    pub total_chars: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    separator: String,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl ContextAssembler {
    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Concatenate chunks in the given order until `max_chars` would be exceeded.
    ///
    /// Stops at the first chunk that does not fit; later, smaller chunks are
    /// not considered. The first chunk is always included, even when it alone
    /// is longer than `max_chars`.
    pub fn assemble(&self, results: &[RetrievedChunk], max_chars: usize) -> AssembledContext {
        let separator_chars = self.separator.chars().count();
        let mut context_text = String::new();
        let mut sources = Vec::new();
        let mut total_chars = 0;

        for result in results {
            let chunk = &result.chunk;
            let chunk_chars = chunk.chunk_text.chars().count();
            let added = if sources.is_empty() {
                chunk_chars
            } else {
                chunk_chars + separator_chars
            };
            if !sources.is_empty() && total_chars + added > max_chars {
                break;
            }

            if !sources.is_empty() {
                context_text.push_str(&self.separator);
            }
            context_text.push_str(&chunk.chunk_text);
            total_chars += added;
            sources.push(SourceRef {
                chunk_id: chunk.id.clone(),
                record_index: chunk.record_index,
                source: chunk.source.clone(),
                original_question_preview: chunk.original_question_preview.clone(),
                score: result.score,
            });
        }

        AssembledContext {
            context_text,
            sources,
            total_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Chunk;

    fn hit(record_index: usize, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            position: record_index,
            score,
            chunk: Chunk {
                id: format!("{record_index}_0"),
                record_index,
                chunk_index: 0,
                chunk_text: text.to_string(),
                source: "medical_dataset".to_string(),
                original_question_preview: format!("question {record_index}"),
                char_start: 0,
                char_end: text.chars().count(),
            },
        }
    }

    #[test]
    fn test_joins_with_separator_within_budget() {
        let results = vec![hit(0, "aaaa", 0.9), hit(1, "bbbb", 0.8), hit(2, "cccc", 0.7)];
        let context = ContextAssembler::default().assemble(&results, 10);

        assert_eq!(context.context_text, "aaaa\n\nbbbb");
        assert_eq!(context.total_chars, 10);
        assert_eq!(context.sources.len(), 2);
        assert_eq!(context.sources[1].chunk_id, "1_0");
        assert_eq!(context.sources[1].score, 0.8);
    }

    #[test]
    fn test_stops_at_first_overflow() {
        let results = vec![hit(0, "aaaa", 0.9), hit(1, "bbbbbbbbbb", 0.8), hit(2, "c", 0.7)];
        let context = ContextAssembler::default().assemble(&results, 12);

        // "c" would fit, but assembly stops at the chunk that did not.
        assert_eq!(context.context_text, "aaaa");
        assert_eq!(context.sources.len(), 1);
    }

    #[test]
    fn test_first_chunk_always_included() {
        let long = "x".repeat(200);
        let results = vec![hit(0, &long, 0.5), hit(1, "short", 0.4)];
        let context = ContextAssembler::default().assemble(&results, 50);

        assert_eq!(context.sources.len(), 1);
        assert_eq!(context.total_chars, 200);
        assert!(context.context_text.chars().count() > 50);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let results = vec![hit(0, "发热咳嗽", 0.9), hit(1, "头痛", 0.8)];
        let context = ContextAssembler::default().assemble(&results, 8);

        assert_eq!(context.total_chars, 8);
        assert_eq!(context.total_chars, context.context_text.chars().count());
        assert_eq!(context.sources.len(), 2);
    }

    #[test]
    fn test_empty_results() {
        let context = ContextAssembler::with_separator("\n---\n").assemble(&[], 100);
        assert!(context.is_empty());
        assert_eq!(context.context_text, "");
        assert_eq!(context.total_chars, 0);
    }
}
