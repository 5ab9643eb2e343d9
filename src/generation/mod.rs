//! Answer generation - prompt in, grounded answer text out.
//!
//! The language model is an external collaborator behind [`Generator`];
//! the query engine only hands it a composed prompt and takes back text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const CHAT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You answer questions using only the provided context chunks. \
     If the context does not contain the answer, say so plainly. \
     Never invent sources.";

// ============================================================================
// Generator trait
// ============================================================================

/// Black-box text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, RagError>;
}

// ============================================================================
// OpenAiGenerator
// ============================================================================

/// OpenAI chat completions client.
pub struct OpenAiGenerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(api_key: String) -> Result<Self, RagError> {
        Self::with_model(api_key, CHAT_MODEL.to_string())
    }

    pub fn with_model(api_key: String, model: String) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            model,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, RagError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::GenerationFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::GenerationFailed(format!(
                "API returned {}: {}",
                status, text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::GenerationFailed(format!("failed to parse response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RagError::GenerationFailed("response contained no choices".into()))
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

// ============================================================================
// Tests
// ============================================================================
