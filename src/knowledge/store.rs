//! Knowledge store interface.
//!
//! A store owns named tables conforming to [`TableSchema`] and offers
//! reuse-or-create table creation, bulk insert with per-row rejection
//! reporting, and metadata-filtered similarity search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RagError;

use super::schema::TableSchema;

// ============================================================================
// Types
// ============================================================================

/// One row of the knowledge table.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic identifier, stable across re-indexing of the same page.
    pub document_id: String,
    /// Chunk content.
    pub text: String,
    /// Embedding vector; length must equal the schema's declared dims.
    pub embedding: Vec<f32>,
    /// Page title, if the page had one.
    pub title: Option<String>,
    /// URL the chunk was derived from.
    pub source_url: String,
    /// Last-modified time of the source page.
    pub lastmod: DateTime<Utc>,
}

/// A chunk returned by similarity search, with its similarity score
/// (1.0 = identical, decreasing with distance).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A row the store refused to commit.
#[derive(Debug, Clone)]
pub struct RejectedRow {
    /// Index into the insert request's row sequence.
    pub row_index: usize,
    pub reason: String,
}

/// Outcome of a bulk insert. Valid rows are committed even when some
/// rows are rejected; rejections are reported per-row, never dropped.
/// Rows whose `document_id` is already in the table are skipped, not
/// rejected: a re-run over an unchanged page is expected, not a fault.
#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    pub inserted: usize,
    /// Rows skipped because their `document_id` already exists.
    pub skipped_existing: usize,
    pub rejected: Vec<RejectedRow>,
}

/// Metadata predicate applied before ranking, not after truncation.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict results to chunks whose source URL starts with this prefix.
    pub source_url_prefix: Option<String>,
}

impl SearchFilter {
    pub fn by_source_prefix(prefix: impl Into<String>) -> Self {
        Self {
            source_url_prefix: Some(prefix.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_url_prefix.is_none()
    }
}

// ============================================================================
// KnowledgeStore trait
// ============================================================================

/// Vector-capable table store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Create the named table, or reuse it if it already exists.
    ///
    /// Repeated process runs against a persistent store are expected,
    /// including tables left half-populated by an aborted build, so
    /// "table already exists" is not an error.
    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), RagError>;

    /// Bulk insert. Rows whose embedding length does not match the table
    /// schema are rejected per-row; rows whose `document_id` is already
    /// in the table are skipped, keeping ids unique across process runs.
    /// The remaining rows are committed.
    async fn insert(&self, name: &str, rows: &[Chunk]) -> Result<InsertReport, RagError>;

    /// Up to `k` nearest rows to `query` by the configured metric.
    /// The filter is applied before ranking.
    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    /// Number of rows in the named table (0 if it does not exist).
    async fn count(&self, name: &str) -> Result<usize, RagError>;
}

// ============================================================================
// Tests
// ============================================================================
