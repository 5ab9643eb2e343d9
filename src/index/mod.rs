//! Index builder - turns crawled pages into a queryable knowledge table.
//!
//! The build pipeline runs Crawling -> Embedding -> Persisting and ends
//! in Ready or Failed. A [`IndexHandle`] memoizes the built index for the
//! process lifetime: the first `ensure_built` call runs the build, later
//! and concurrent callers are handed the same result without a second
//! crawl. The handle is owned by the caller; there is no ambient global
//! index state.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::crawler::{CrawlRequest, PageSource};
use crate::embedding::EmbeddingProvider;
use crate::error::{BuildStage, RagError};
use crate::knowledge::{Chunk, Chunker, KnowledgeStore, TableSchema};

// ============================================================================
// Types
// ============================================================================

/// Observable lifecycle of an index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexState {
    /// No build attempted yet.
    Uninitialized,
    /// A build is in flight, in the given stage. Queries must not be
    /// issued yet; callers wait or fail fast.
    Building(BuildStage),
    /// The index is built and queryable.
    Ready,
    /// The last build attempt failed. Distinct from `Uninitialized` so a
    /// caller can offer retry instead of wait.
    Failed {
        stage: Option<BuildStage>,
        message: String,
    },
}

/// Reference to a successfully built index.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub table_name: String,
    pub dims: usize,
    pub chunk_count: usize,
}

/// Deterministic chunk identifier: re-running ingestion against an
/// unchanged page yields the same ids, which is what makes upsert-style
/// re-indexing possible later.
pub fn document_id(source_url: &str, chunk_index: usize) -> String {
    let digest = Sha256::digest(format!("{}#{}", source_url, chunk_index));
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

// ============================================================================
// IndexBuilder
// ============================================================================

/// Orchestrates PageSource -> Chunker -> EmbeddingProvider -> KnowledgeStore.
pub struct IndexBuilder {
    source: Arc<dyn PageSource>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
    chunker: Box<dyn Chunker>,
    schema: TableSchema,
    table_name: String,
    request: CrawlRequest,
}

impl IndexBuilder {
    /// Wire up the pipeline. The schema's declared dims must equal the
    /// embedding provider's output dimensionality; a mismatch fails here,
    /// before any network call is made.
    pub fn new(
        source: Arc<dyn PageSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn KnowledgeStore>,
        chunker: Box<dyn Chunker>,
        schema: TableSchema,
        table_name: String,
        request: CrawlRequest,
    ) -> Result<Self, RagError> {
        schema.validate_dims(embedder.dimension())?;
        Ok(Self {
            source,
            embedder,
            store,
            chunker,
            schema,
            table_name,
            request,
        })
    }

    /// Run the full build once. State transitions are reported through
    /// `set_stage`; errors identify their stage via [`RagError::stage`].
    async fn run(&self, set_stage: &dyn Fn(BuildStage)) -> Result<BuiltIndex, RagError> {
        set_stage(BuildStage::Crawling);
        let documents = self.source.crawl(&self.request).await?;
        tracing::info!("Crawl returned {} documents", documents.len());

        // Chunk each document, attaching its metadata to every chunk, and
        // de-duplicate by id: a crawl that revisits a page must not insert
        // the same chunk twice.
        let mut pending: Vec<(String, Chunk)> = Vec::new();
        let mut seen = HashSet::new();
        for document in &documents {
            for (chunk_index, text) in self.chunker.chunk(&document.content).into_iter().enumerate()
            {
                let id = document_id(&document.metadata.source_url, chunk_index);
                if !seen.insert(id.clone()) {
                    tracing::warn!(
                        "Duplicate chunk id for {} (chunk {}), skipping",
                        document.metadata.source_url,
                        chunk_index
                    );
                    continue;
                }
                pending.push((
                    text.clone(),
                    Chunk {
                        document_id: id,
                        text,
                        embedding: Vec::new(),
                        title: document.metadata.title.clone(),
                        source_url: document.metadata.source_url.clone(),
                        lastmod: document.metadata.lastmod,
                    },
                ));
            }
        }

        set_stage(BuildStage::Embedding);
        let texts: Vec<String> = pending.iter().map(|(text, _)| text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingFailed(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }

        let rows: Vec<Chunk> = pending
            .into_iter()
            .zip(vectors)
            .map(|((_, mut chunk), embedding)| {
                chunk.embedding = embedding;
                chunk
            })
            .collect();

        set_stage(BuildStage::Persisting);
        self.store
            .create_table(&self.table_name, &self.schema)
            .await?;
        let report = self.store.insert(&self.table_name, &rows).await?;
        for rejected in &report.rejected {
            tracing::warn!(
                "Store rejected row {}: {}",
                rejected.row_index,
                rejected.reason
            );
        }
        // Rows skipped as already present count as success: a rebuild over
        // an unchanged site finds every id in place and inserts nothing.
        if report.inserted == 0 && report.skipped_existing == 0 && !rows.is_empty() {
            return Err(RagError::StoreUnavailable(
                "store rejected every row of the build".into(),
            ));
        }

        tracing::info!(
            "Index ready: table '{}', {} chunks ({} already present, {} rejected)",
            self.table_name,
            report.inserted + report.skipped_existing,
            report.skipped_existing,
            report.rejected.len()
        );
        Ok(BuiltIndex {
            table_name: self.table_name.clone(),
            dims: self.schema.dims(),
            chunk_count: report.inserted + report.skipped_existing,
        })
    }
}

// ============================================================================
// IndexHandle
// ============================================================================

/// Caller-owned handle around a memoized index build.
///
/// The `OnceCell` doubles as the build lock: concurrent `ensure_built`
/// callers wait on the in-flight build instead of starting another one.
/// After a failure the cell stays empty, so a later call retries.
pub struct IndexHandle {
    builder: IndexBuilder,
    cell: OnceCell<Arc<BuiltIndex>>,
    state: RwLock<IndexState>,
}

impl IndexHandle {
    pub fn new(builder: IndexBuilder) -> Self {
        Self {
            builder,
            cell: OnceCell::new(),
            state: RwLock::new(IndexState::Uninitialized),
        }
    }

    /// Non-blocking state check.
    pub fn state(&self) -> IndexState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or(IndexState::Uninitialized)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), IndexState::Ready)
    }

    /// The built index, if the build already finished.
    pub fn built(&self) -> Option<Arc<BuiltIndex>> {
        self.cell.get().cloned()
    }

    /// Build the index if it has not been built yet, otherwise return the
    /// memoized reference. Blocks until the (possibly already in-flight)
    /// build finishes.
    pub async fn ensure_built(&self) -> Result<Arc<BuiltIndex>, RagError> {
        let result = self
            .cell
            .get_or_try_init(|| async {
                let set_stage = |stage: BuildStage| {
                    if let Ok(mut state) = self.state.write() {
                        *state = IndexState::Building(stage);
                    }
                };
                match self.builder.run(&set_stage).await {
                    Ok(index) => {
                        if let Ok(mut state) = self.state.write() {
                            *state = IndexState::Ready;
                        }
                        Ok(Arc::new(index))
                    }
                    Err(e) => {
                        if let Ok(mut state) = self.state.write() {
                            *state = IndexState::Failed {
                                stage: e.stage(),
                                message: e.to_string(),
                            };
                        }
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(result.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
