//! Stub collaborators for tests: a counting page source, a fixed-vector
//! embedder, an in-memory knowledge store, and a canned generator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::crawler::{CrawlRequest, Document, PageMetadata, PageSource};
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::generation::Generator;
use crate::knowledge::{
    Chunk, InsertReport, KnowledgeStore, RejectedRow, ScoredChunk, SearchFilter, TableSchema,
};

// ============================================================================
// StubSource
// ============================================================================

/// Returns a fixed document set and counts how many crawls were issued.
pub(crate) struct StubSource {
    pub documents: Vec<Document>,
    pub crawl_calls: AtomicUsize,
}

impl StubSource {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            crawl_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.crawl_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for StubSource {
    async fn crawl(&self, request: &CrawlRequest) -> Result<Vec<Document>, RagError> {
        self.crawl_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .documents
            .iter()
            .take(request.page_limit)
            .cloned()
            .collect())
    }
}

/// A document with content "page-N" style text.
pub(crate) fn doc(url: &str, title: &str, content: &str) -> Document {
    Document {
        content: content.to_string(),
        metadata: PageMetadata {
            title: Some(title.to_string()),
            source_url: url.to_string(),
            lastmod: Utc::now(),
        },
    }
}

// ============================================================================
// StubEmbedder
// ============================================================================

/// Deterministic embedder: maps known texts to fixed vectors, everything
/// else to a default vector.
pub(crate) struct StubEmbedder {
    pub dims: usize,
    pub vectors: HashMap<String, Vec<f32>>,
    pub default: Vec<f32>,
}

impl StubEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: HashMap::new(),
            default: vec![0.0; dims],
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dims);
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn with_default(mut self, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dims);
        self.default = vector;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "stub-embedder"
    }
}

/// Embedder whose every call fails, for abort-path tests.
pub(crate) struct FailingEmbedder {
    pub dims: usize,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
        Err(RagError::EmbeddingFailed("stub provider outage".into()))
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "failing-embedder"
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct MemoryTable {
    dims: usize,
    rows: Vec<Chunk>,
}

/// In-memory knowledge store with brute-force L2 search. Ties keep
/// insertion order (stable sort).
#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    pub insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, name: &str) -> Vec<Chunk> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), RagError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.get(name) {
            if existing.dims != schema.dims() {
                return Err(RagError::Configuration(format!(
                    "table '{}' exists with dims:{} but the schema declares dims:{}",
                    name,
                    existing.dims,
                    schema.dims()
                )));
            }
            return Ok(());
        }
        tables.insert(
            name.to_string(),
            MemoryTable {
                dims: schema.dims(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert(&self, name: &str, rows: &[Chunk]) -> Result<InsertReport, RagError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| RagError::StoreUnavailable(format!("no table '{}'", name)))?;

        let mut report = InsertReport::default();
        for (row_index, row) in rows.iter().enumerate() {
            if table.rows.iter().any(|r| r.document_id == row.document_id) {
                report.skipped_existing += 1;
            } else if row.embedding.len() == table.dims {
                table.rows.push(row.clone());
                report.inserted += 1;
            } else {
                report.rejected.push(RejectedRow {
                    row_index,
                    reason: format!(
                        "embedding length {} does not match table dims {}",
                        row.embedding.len(),
                        table.dims
                    ),
                });
            }
        }
        Ok(report)
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let tables = self.tables.lock().unwrap();
        let Some(table) = tables.get(name) else {
            return Ok(vec![]);
        };
        if query.len() != table.dims {
            return Err(RagError::Configuration(format!(
                "query vector length {} does not match table dims {}",
                query.len(),
                table.dims
            )));
        }

        let prefix = filter.and_then(|f| f.source_url_prefix.as_deref());
        let mut scored: Vec<ScoredChunk> = table
            .rows
            .iter()
            .filter(|row| prefix.map_or(true, |p| row.source_url.starts_with(p)))
            .map(|row| {
                let distance: f32 = row
                    .embedding
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                ScoredChunk {
                    chunk: row.clone(),
                    score: 1.0 / (1.0 + distance),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, name: &str) -> Result<usize, RagError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(name)
            .map(|t| t.rows.len())
            .unwrap_or(0))
    }
}

// ============================================================================
// CannedGenerator
// ============================================================================

/// Returns a fixed answer and records the prompts it saw.
pub(crate) struct CannedGenerator {
    pub answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, RagError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}
