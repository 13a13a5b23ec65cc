//! Answer generation behind a single typed result.
//!
//! The retrieval core never looks at LLM response shapes. An
//! [`AnswerGenerator`] takes one assembled prompt and reports an
//! [`AnswerResult`]; all response parsing stays inside the adapter.

use crate::config::GeneratorSection;
use crate::error::{Result, RetrieverError};
use crate::retrieval::policy::ProviderPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Outcome of one generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerResult {
    /// The answer, or a description of the failure
    pub text: String,
    pub succeeded: bool,
}

impl AnswerResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            succeeded: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            succeeded: false,
        }
    }
}

/// Produces an answer for an assembled prompt.
///
/// Implementations never return an error; failures are reported through
/// [`AnswerResult::succeeded`].
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> AnswerResult;

    fn model_name(&self) -> &str;
}

/// Generator for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    system_prompt: Option<String>,
    policy: ProviderPolicy,
}

impl ChatCompletionsGenerator {
    /// Create a generator from the `[generator]` section and an explicit key.
    pub fn new(config: &GeneratorSection, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RetrieverError::configuration("API key must not be empty"));
        }
        config.validate()?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: None,
            policy: config.policy(),
        })
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        }
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "requesting answer");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| RetrieverError::generation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(RetrieverError::generation(format!(
                "API returned {status}: {detail}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::generation(format!("failed to parse response: {e}")))?;
        extract_answer(body)
    }
}

#[async_trait]
impl AnswerGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str) -> AnswerResult {
        match self.policy.run("answer generation", || self.request(prompt)).await {
            Ok(text) => AnswerResult::success(text),
            Err(e) => {
                error!("Answer generation failed: {e}");
                AnswerResult::failure(e.to_string())
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── chat/completions request/response types ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// First non-blank assistant message wins.
fn extract_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .map(|choice| choice.message)
        .filter(|message| message.role.as_deref().is_none_or(|role| role == "assistant"))
        .filter_map(|message| message.content)
        .find(|content| !content.trim().is_empty())
        .ok_or_else(|| RetrieverError::generation("response contained no assistant message"))
}
