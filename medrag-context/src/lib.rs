pub mod record;
pub mod text;

// Re-export the main chunking types for external use
pub use record::{MedicalRecord, QUESTION_PREVIEW_CHARS, question_preview};
pub use text::{ChunkConfig, ChunkConfigError, MEDICAL_DELIMITERS, RecordChunk, RecordChunker};
