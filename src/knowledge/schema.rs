//! Table schema registry.
//!
//! The knowledge table has a fixed column layout plus one vector-indexed
//! column described by an explicit `{type, metric, dims}` triple. The
//! triple is fixed at table creation time and must match every later
//! insert and search; a mismatch is a configuration error, not something
//! to recover from at runtime.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

use crate::error::RagError;

/// Name of the vector column.
pub const EMBEDDING_COLUMN: &str = "embedding";

// ============================================================================
// Vector index spec
// ============================================================================

/// Index structure used for the vector column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Exhaustive search. The dataset here is small enough that LanceDB's
    /// un-indexed flat scan is the right choice.
    Flat,
}

/// Distance metric used for similarity search. The store pins its
/// searches to this metric; scores are computed as `1 / (1 + d)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    L2,
}

/// `{type, metric, dims}` triple attached to the vector column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorIndexSpec {
    pub index_type: IndexType,
    pub metric: DistanceMetric,
    pub dims: usize,
}

// ============================================================================
// TableSchema
// ============================================================================

/// Fixed column layout of the knowledge table.
///
/// Columns, in order: `document_id`, `text`, `embedding`, `title`,
/// `source_url`, `lastmod` (RFC3339 string).
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub vector: VectorIndexSpec,
}

impl TableSchema {
    /// Registry entry point: the documentation-site knowledge table with
    /// a flat L2 vector index of the given dimensionality.
    pub fn documentation(dims: usize) -> Self {
        Self {
            vector: VectorIndexSpec {
                index_type: IndexType::Flat,
                metric: DistanceMetric::L2,
                dims,
            },
        }
    }

    pub fn dims(&self) -> usize {
        self.vector.dims
    }

    /// Fail fast if the embedding provider's output dimensionality does
    /// not match the schema. Called before any network call.
    pub fn validate_dims(&self, provider_dims: usize) -> Result<(), RagError> {
        if provider_dims != self.vector.dims {
            return Err(RagError::Configuration(format!(
                "embedding provider produces {}-dim vectors but the table schema declares dims:{}",
                provider_dims, self.vector.dims
            )));
        }
        Ok(())
    }

    /// Arrow schema for table creation and record batches.
    pub fn to_arrow(&self) -> Schema {
        Schema::new(vec![
            Field::new("document_id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                EMBEDDING_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.vector.dims as i32,
                ),
                false,
            ),
            Field::new("title", DataType::Utf8, true),
            Field::new("source_url", DataType::Utf8, false),
            Field::new("lastmod", DataType::Utf8, false),
        ])
    }
}

// ============================================================================
// Tests
// ============================================================================
