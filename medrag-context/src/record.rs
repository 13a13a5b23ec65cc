//! The source record model: one medical question with its reasoning and answer.
//!
//! Records arrive from the medical reasoning dataset, whose JSON keys are
//! `Question`, `Complex_CoT` and `Response`. Any of them may be missing; a
//! missing field is read as an empty string so that chunking never fails on
//! sparse input.

use serde::{Deserialize, Serialize};

/// Number of characters kept from a question when building its preview.
pub const QUESTION_PREVIEW_CHARS: usize = 100;

/// A single question/reasoning/answer record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    /// The patient or clinician question.
    #[serde(default, alias = "Question")]
    pub question: String,
    /// Chain-of-thought style reasoning leading to the answer.
    #[serde(default, alias = "Complex_CoT", alias = "complex_cot")]
    pub reasoning: String,
    /// The final answer.
    #[serde(default, alias = "Response", alias = "response")]
    pub answer: String,
}

impl MedicalRecord {
    pub fn new(
        question: impl Into<String>,
        reasoning: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            reasoning: reasoning.into(),
            answer: answer.into(),
        }
    }

    /// Render the record as the labelled document that gets chunked.
    ///
    /// The section labels are always present, so the document is never empty
    /// even when every field is.
    ///
    /// ```
    /// use medrag_context::MedicalRecord;
    ///
    /// let record = MedicalRecord::new("What is a fever?", "", "A raised body temperature.");
    /// assert_eq!(
    ///     record.document(),
    ///     "Question: What is a fever?\n\nReasoning: \n\nAnswer: A raised body temperature.\n"
    /// );
    /// ```
    pub fn document(&self) -> String {
        format!(
            "Question: {}\n\nReasoning: {}\n\nAnswer: {}\n",
            self.question, self.reasoning, self.answer
        )
    }

    /// Short preview of the question used for citations.
    pub fn question_preview(&self) -> String {
        question_preview(&self.question)
    }

    /// True when all three fields are blank.
    pub fn is_empty(&self) -> bool {
        self.question.trim().is_empty()
            && self.reasoning.trim().is_empty()
            && self.answer.trim().is_empty()
    }
}

/// Truncate `question` to [`QUESTION_PREVIEW_CHARS`] characters, appending
/// `...` when anything was cut.
pub fn question_preview(question: &str) -> String {
    let mut chars = question.chars();
    let preview: String = chars.by_ref().take(QUESTION_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}
