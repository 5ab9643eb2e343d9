//! docqa - retrieval-augmented question answering over a crawled
//! documentation site.
//!
//! Pipeline: crawl pages from a seed URL, chunk and embed them, persist
//! the chunks in a vector-capable LanceDB table, and answer free-text
//! questions by retrieving the most similar chunks and composing a
//! grounded answer.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod knowledge;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::AppConfig;
pub use crawler::{CrawlRequest, Document, PageMetadata, PageSource, SiteCrawler};
pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use error::{BuildStage, FailureKind, RagError};
pub use generation::{Generator, OpenAiGenerator};
pub use index::{BuiltIndex, IndexBuilder, IndexHandle, IndexState};
pub use knowledge::{
    default_chunker, Chunk, Chunker, InsertReport, KnowledgeStore, LanceKnowledgeStore,
    ScoredChunk, SearchFilter, SectionChunker, TableSchema, WholePageChunker,
};
pub use query::{QueryEngine, QueryResult, SourceRef};
