//! Query engine - free-text question to grounded answer.
//!
//! Embeds the question, retrieves the top-k similar chunks, and hands
//! them to the generator with an explicit instruction to stay inside the
//! retrieved context. Queries are read-only: the engine holds no mutable
//! state and concurrent `answer` calls are safe once the index is built.

use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::generation::Generator;
use crate::knowledge::{KnowledgeStore, ScoredChunk, SearchFilter};

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 4;

/// Answer returned when retrieval finds nothing to ground on. The
/// generator is not consulted in that case.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough indexed context to answer that question.";

// ============================================================================
// Types
// ============================================================================

/// Provenance of one retrieved chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub title: Option<String>,
    pub source_url: String,
    pub score: f32,
}

/// Per-request answer. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    /// Retrieved sources, best first. Empty means the answer is the
    /// insufficient-context notice, not generated content.
    pub sources: Vec<SourceRef>,
}

impl QueryResult {
    /// Whether the answer is grounded in at least one retrieved source.
    pub fn is_grounded(&self) -> bool {
        !self.sources.is_empty()
    }

    fn insufficient_context() -> Self {
        Self {
            answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

// ============================================================================
// QueryEngine
// ============================================================================

/// Answers questions against a built knowledge table.
pub struct QueryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn KnowledgeStore>,
    table_name: String,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn KnowledgeStore>,
        table_name: String,
    ) -> Self {
        Self {
            embedder,
            generator,
            store,
            table_name,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Answer a question from the indexed documentation.
    pub async fn answer(&self, question: &str) -> Result<QueryResult, RagError> {
        self.answer_filtered(question, None).await
    }

    /// Answer with an optional metadata filter restricting which chunks
    /// may be retrieved.
    pub async fn answer_filtered(
        &self,
        question: &str,
        filter: Option<&SearchFilter>,
    ) -> Result<QueryResult, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidQuery("question is empty".into()));
        }

        let query_vector = self.embedder.embed(question).await?;
        let retrieved = self
            .store
            .search(&self.table_name, &query_vector, self.top_k, filter)
            .await?;

        if retrieved.is_empty() {
            tracing::debug!("No relevant chunks for question: {}", question);
            return Ok(QueryResult::insufficient_context());
        }

        let prompt = compose_prompt(question, &retrieved);
        let answer = self.generator.generate(&prompt).await?;

        let sources = retrieved
            .into_iter()
            .map(|scored| SourceRef {
                title: scored.chunk.title,
                source_url: scored.chunk.source_url,
                score: scored.score,
            })
            .collect();

        Ok(QueryResult { answer, sources })
    }
}

/// Lay out the retrieved chunks, each labeled with its source, followed
/// by the question.
fn compose_prompt(question: &str, retrieved: &[ScoredChunk]) -> String {
    let mut prompt = String::from("Context:\n\n");
    for (i, scored) in retrieved.iter().enumerate() {
        let title = scored.chunk.title.as_deref().unwrap_or("untitled");
        prompt.push_str(&format!(
            "[{}] {} ({})\n{}\n\n",
            i + 1,
            title,
            scored.chunk.source_url,
            scored.chunk.text
        ));
    }
    prompt.push_str(&format!("Question: {}\n", question));
    prompt
}

// ============================================================================
// Tests
// ============================================================================
