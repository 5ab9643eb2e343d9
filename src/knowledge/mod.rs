//! Knowledge module - schema, chunking, and the vector-capable store.
//!
//! - Schema: fixed column layout + `{type, metric, dims}` vector index spec
//! - Store: reuse-or-create tables, bulk insert, similarity search
//! - LanceDB: the store implementation (Arrow record batches)
//! - Chunker: pluggable document-to-chunk splitting

mod chunker;
mod lance;
mod schema;
mod store;

// Re-exports
pub use chunker::{default_chunker, Chunker, SectionChunker, WholePageChunker};
pub use lance::LanceKnowledgeStore;
pub use schema::{DistanceMetric, IndexType, TableSchema, VectorIndexSpec, EMBEDDING_COLUMN};
pub use store::{
    Chunk, InsertReport, KnowledgeStore, RejectedRow, ScoredChunk, SearchFilter,
};
