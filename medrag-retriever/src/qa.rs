//! Question answering on top of the retriever.
//!
//! ```text
//! question → Retriever::query → ContextAssembler → prompt → AnswerGenerator
//! ```
//!
//! When retrieval finds nothing, the generator is not called and the user is
//! pointed to a medical professional instead.

use crate::answer::AnswerGenerator;
use crate::error::Result;
use crate::retrieval::context::SourceRef;
use crate::retrieval::retriever::Retriever;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Fallback answer when the knowledge base has nothing relevant.
pub const NOT_FOUND_ANSWER: &str = "I could not find relevant information in the knowledge base. \
Please consult a medical professional.";

/// System prompt for the medical assistant persona.
pub const MEDICAL_SYSTEM_PROMPT: &str = "You are a professional medical AI assistant with broad medical knowledge and clinical experience.

Your responsibilities:
1. Symptom questions: help users understand possible causes of symptoms and how to respond
2. Medication information: give accurate usage guidance and safety information
3. Health indicators: explain what common test results mean
4. Emergencies: recognize emergencies and give first-response guidance

Principles:
- Answer from the provided medical knowledge base
- Give accurate, evidence-based medical information
- In emergencies, clearly advise seeking medical care immediately
- Do not give specific diagnoses; recommend consulting a doctor
- Cite the relevant knowledge sources

Answer format:
1. Answer the question directly
2. Give explanation and background
3. Give practical advice and precautions
4. Recommend seeing a doctor when necessary
5. List the sources used

Always put the user's safety and health first.";

/// A complete answer with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    /// Characters of retrieved context sent to the generator
    pub context_chars: usize,
    /// False when the generator failed or was not called
    pub generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct MedicalAssistant {
    retriever: Arc<Retriever>,
    generator: Arc<dyn AnswerGenerator>,
    top_k: usize,
    max_context_chars: usize,
}

impl MedicalAssistant {
    pub fn new(retriever: Arc<Retriever>, generator: Arc<dyn AnswerGenerator>) -> Self {
        Self {
            retriever,
            generator,
            top_k: 5,
            max_context_chars: 4000,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_max_context_chars(mut self, max_context_chars: usize) -> Self {
        self.max_context_chars = max_context_chars;
        self
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn generator(&self) -> &Arc<dyn AnswerGenerator> {
        &self.generator
    }

    /// Retrieve context for `question` and generate an answer.
    pub async fn ask(&self, question: &str) -> Result<AssistantAnswer> {
        let retrieval = self.retriever.query(question, self.top_k).await?;
        if !retrieval.is_grounded() {
            info!("No grounding found for question");
            return Ok(AssistantAnswer {
                answer: NOT_FOUND_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                context_chars: 0,
                generated: false,
                message: retrieval.message,
            });
        }

        let context = self
            .retriever
            .assembler()
            .assemble(&retrieval.results, self.max_context_chars);
        let prompt = build_prompt(question, &context.context_text);

        info!(
            "Generating answer with {} from {} sources ({} chars of context)",
            self.generator.model_name(),
            context.sources.len(),
            context.total_chars
        );
        let result = self.generator.generate(&prompt).await;

        Ok(AssistantAnswer {
            answer: result.text,
            sources: context.sources,
            confidence: retrieval.confidence,
            context_chars: context.total_chars,
            generated: result.succeeded,
            message: None,
        })
    }
}

/// Prompt sent to the generator for one question.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the user's question using the following medical knowledge base information.\n\n\
         User question: {question}\n\n\
         Relevant medical knowledge:\n{context}\n\n\
         Give an accurate, professional answer and state the sources of the information.\n"
    )
}
