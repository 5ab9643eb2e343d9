//! LanceDB-backed knowledge store.
//!
//! Tables live as Lance datasets under the configured data directory.
//! Similarity search is LanceDB's flat scan over the `embedding` column;
//! L2 distances are converted to a `1 / (1 + d)` similarity score.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::DistanceType;

use crate::error::RagError;

use super::schema::{TableSchema, EMBEDDING_COLUMN};
use super::store::{Chunk, InsertReport, KnowledgeStore, RejectedRow, ScoredChunk, SearchFilter};

// ============================================================================
// LanceKnowledgeStore
// ============================================================================

/// Knowledge store over a local or remote LanceDB dataset.
pub struct LanceKnowledgeStore {
    db: Connection,
}

impl LanceKnowledgeStore {
    /// Connect to the LanceDB dataset at `path`, creating the directory
    /// if needed.
    pub async fn open(path: &Path) -> Result<Self, RagError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RagError::StoreUnavailable(format!("failed to create data directory: {}", e))
                })?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Configuration("data directory path is not UTF-8".into()))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(store_err("failed to connect to LanceDB"))?;

        Ok(Self { db })
    }

    async fn table_exists(&self, name: &str) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }

    async fn open_table(&self, name: &str) -> Result<lancedb::table::Table, RagError> {
        self.db
            .open_table(name)
            .execute()
            .await
            .map_err(store_err("failed to open table"))
    }

    /// Drop the named table so the next build starts from scratch.
    /// A missing table is fine.
    pub async fn drop_table(&self, name: &str) -> Result<(), RagError> {
        if !self.table_exists(name).await {
            return Ok(());
        }
        self.db
            .drop_table(name)
            .await
            .map_err(store_err("failed to drop table"))
    }

    /// Embedding width declared by an existing table.
    async fn table_dims(&self, table: &lancedb::table::Table) -> Result<usize, RagError> {
        let schema = table
            .schema()
            .await
            .map_err(store_err("failed to read table schema"))?;
        let field = schema
            .field_with_name(EMBEDDING_COLUMN)
            .map_err(|e| RagError::StoreUnavailable(format!("table has no embedding column: {}", e)))?;
        match field.data_type() {
            DataType::FixedSizeList(_, width) => Ok(*width as usize),
            other => Err(RagError::StoreUnavailable(format!(
                "embedding column has unexpected type {:?}",
                other
            ))),
        }
    }

    /// All `document_id` values currently in the table.
    async fn existing_ids(
        &self,
        table: &lancedb::table::Table,
    ) -> Result<HashSet<String>, RagError> {
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["document_id"]))
            .execute()
            .await
            .map_err(store_err("failed to scan existing ids"))?
            .try_collect()
            .await
            .map_err(store_err("failed to read existing ids"))?;

        let mut ids = HashSet::new();
        for batch in &batches {
            let column = string_column(batch, "document_id")?;
            for i in 0..column.len() {
                ids.insert(column.value(i).to_string());
            }
        }
        Ok(ids)
    }

    /// Convert rows into one Arrow RecordBatch matching the table schema.
    fn rows_to_batch(rows: &[Chunk], dims: usize) -> Result<RecordBatch, RagError> {
        let ids: Vec<&str> = rows.iter().map(|r| r.document_id.as_str()).collect();
        let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
        let titles: Vec<Option<&str>> = rows.iter().map(|r| r.title.as_deref()).collect();
        let urls: Vec<&str> = rows.iter().map(|r| r.source_url.as_str()).collect();
        let lastmods: Vec<String> = rows.iter().map(|r| r.lastmod.to_rfc3339()).collect();

        let flat: Vec<f32> = rows
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();
        let item_field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            item_field,
            dims as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::StoreUnavailable(format!("failed to build embedding array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(TableSchema::documentation(dims).to_arrow()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings),
                Arc::new(StringArray::from(titles)),
                Arc::new(StringArray::from(urls)),
                Arc::new(StringArray::from(lastmods)),
            ],
        )
        .map_err(|e| RagError::StoreUnavailable(format!("failed to build record batch: {}", e)))
    }

    /// Pull scored chunks out of a search result batch.
    fn batch_to_chunks(batch: &RecordBatch, out: &mut Vec<ScoredChunk>) -> Result<(), RagError> {
        let ids = string_column(batch, "document_id")?;
        let texts = string_column(batch, "text")?;
        let titles = string_column(batch, "title")?;
        let urls = string_column(batch, "source_url")?;
        let lastmods = string_column(batch, "lastmod")?;

        let embeddings = batch
            .column_by_name(EMBEDDING_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| RagError::StoreUnavailable("missing embedding column".into()))?;

        // _distance is appended by LanceDB to every vector search result.
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| RagError::StoreUnavailable("missing _distance column".into()))?;

        for i in 0..batch.num_rows() {
            let embedding = embeddings
                .value(i)
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|a| a.values().to_vec())
                .unwrap_or_default();

            let lastmod = DateTime::parse_from_rfc3339(lastmods.value(i))
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            let title = if titles.is_null(i) {
                None
            } else {
                Some(titles.value(i).to_string())
            };

            let distance = distances.value(i);
            out.push(ScoredChunk {
                chunk: Chunk {
                    document_id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    embedding,
                    title,
                    source_url: urls.value(i).to_string(),
                    lastmod,
                },
                score: 1.0 / (1.0 + distance),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for LanceKnowledgeStore {
    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), RagError> {
        if self.table_exists(name).await {
            // Reuse, but the vector column of the existing table must match
            // the declared schema. A mismatch is fatal configuration, not
            // something inserts should discover later.
            let table = self.open_table(name).await?;
            let existing = self.table_dims(&table).await?;
            if existing != schema.dims() {
                return Err(RagError::Configuration(format!(
                    "table '{}' exists with dims:{} but the schema declares dims:{}",
                    name,
                    existing,
                    schema.dims()
                )));
            }
            tracing::debug!("Reusing existing table '{}' (dims={})", name, existing);
            return Ok(());
        }

        self.db
            .create_empty_table(name, Arc::new(schema.to_arrow()))
            .execute()
            .await
            .map_err(store_err("failed to create table"))?;
        tracing::info!("Created table '{}' (dims={})", name, schema.dims());
        Ok(())
    }

    async fn insert(&self, name: &str, rows: &[Chunk]) -> Result<InsertReport, RagError> {
        if rows.is_empty() {
            return Ok(InsertReport::default());
        }
        if !self.table_exists(name).await {
            return Err(RagError::StoreUnavailable(format!(
                "table '{}' does not exist; create it before inserting",
                name
            )));
        }

        let table = self.open_table(name).await?;
        let dims = self.table_dims(&table).await?;
        // Ids already in the table must stay unique, including the ones
        // left behind by a prior aborted or completed run.
        let mut seen = self.existing_ids(&table).await?;

        // Malformed vectors are reported per-row; the valid rows still commit.
        let mut valid = Vec::with_capacity(rows.len());
        let mut skipped_existing = 0;
        let mut rejected = Vec::new();
        for (row_index, row) in rows.iter().enumerate() {
            if seen.contains(&row.document_id) {
                tracing::debug!("Row {} already in '{}', skipping", row.document_id, name);
                skipped_existing += 1;
            } else if row.embedding.len() == dims {
                seen.insert(row.document_id.clone());
                valid.push(row.clone());
            } else {
                rejected.push(RejectedRow {
                    row_index,
                    reason: format!(
                        "embedding length {} does not match table dims {}",
                        row.embedding.len(),
                        dims
                    ),
                });
            }
        }

        if !valid.is_empty() {
            let batch = Self::rows_to_batch(&valid, dims)?;
            let schema = batch.schema();
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(batches)
                .execute()
                .await
                .map_err(store_err("failed to add rows to table"))?;
        }

        Ok(InsertReport {
            inserted: valid.len(),
            skipped_existing,
            rejected,
        })
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if !self.table_exists(name).await {
            return Ok(vec![]);
        }

        let table = self.open_table(name).await?;
        let dims = self.table_dims(&table).await?;
        if query.len() != dims {
            return Err(RagError::Configuration(format!(
                "query vector length {} does not match table dims {}",
                query.len(),
                dims
            )));
        }

        // Scores assume L2 distances; pin the metric to the table spec.
        let mut search = table
            .vector_search(query.to_vec())
            .map_err(store_err("failed to build vector search"))?
            .distance_type(DistanceType::L2)
            .limit(k);

        // Pushed into the scan, so it restricts candidates before ranking.
        if let Some(prefix) = filter.and_then(|f| f.source_url_prefix.as_deref()) {
            search = search.only_if(format!(
                "source_url LIKE '{}%'",
                prefix.replace('\'', "''")
            ));
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .map_err(store_err("failed to execute vector search"))?
            .try_collect()
            .await
            .map_err(store_err("failed to read search results"))?;

        let mut results = Vec::new();
        for batch in &batches {
            Self::batch_to_chunks(batch, &mut results)?;
        }
        Ok(results)
    }

    async fn count(&self, name: &str) -> Result<usize, RagError> {
        if !self.table_exists(name).await {
            return Ok(0);
        }
        let table = self.open_table(name).await?;
        table
            .count_rows(None)
            .await
            .map_err(store_err("failed to count rows"))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, RagError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::StoreUnavailable(format!("missing {} column", name)))
}

fn store_err(context: &'static str) -> impl Fn(lancedb::Error) -> RagError {
    move |e| RagError::StoreUnavailable(format!("{}: {}", context, e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIMS: usize = 4;

    fn chunk(id: &str, url: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            document_id: id.to_string(),
            text: format!("content of {}", id),
            embedding,
            title: Some(format!("Title {}", id)),
            source_url: url.to_string(),
            lastmod: Utc::now(),
        }
    }

    async fn open_store(dir: &TempDir) -> LanceKnowledgeStore {
        LanceKnowledgeStore::open(&dir.path().join("test.lance"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_is_reuse_or_create() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let schema = TableSchema::documentation(DIMS);

        store.create_table("docs", &schema).await.unwrap();
        // Second call reuses the table.
        store.create_table("docs", &schema).await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reuse_with_mismatched_dims_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .create_table("docs", &TableSchema::documentation(DIMS))
            .await
            .unwrap();
        let err = store
            .create_table("docs", &TableSchema::documentation(8))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_insert_reports_rejected_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .create_table("docs", &TableSchema::documentation(DIMS))
            .await
            .unwrap();

        let rows = vec![
            chunk("a", "https://docs.example.com/a", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("bad", "https://docs.example.com/bad", vec![1.0, 0.0]),
            chunk("b", "https://docs.example.com/b", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        let report = store.insert("docs", &rows).await.unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].row_index, 1);
        assert_eq!(store.count("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_skips_ids_already_in_table() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .create_table("docs", &TableSchema::documentation(DIMS))
            .await
            .unwrap();

        let rows = vec![
            chunk("a", "https://docs.example.com/a", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("b", "https://docs.example.com/b", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        store.insert("docs", &rows).await.unwrap();

        // Re-inserting the same ids plus one new row commits only the new
        // row; the table never holds two rows with one id.
        let mut again = rows.clone();
        again.push(chunk("c", "https://docs.example.com/c", vec![0.0, 0.0, 1.0, 0.0]));
        let report = store.insert("docs", &again).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_existing, 2);
        assert!(report.rejected.is_empty());
        assert_eq!(store.count("docs").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_round_trip_top1() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .create_table("docs", &TableSchema::documentation(DIMS))
            .await
            .unwrap();

        let target = chunk("hit", "https://docs.example.com/hit", vec![0.9, 0.1, 0.0, 0.0]);
        let rows = vec![
            chunk("x", "https://docs.example.com/x", vec![0.0, 0.0, 1.0, 0.0]),
            target.clone(),
            chunk("y", "https://docs.example.com/y", vec![0.0, 0.0, 0.0, 1.0]),
        ];
        store.insert("docs", &rows).await.unwrap();

        // Searching with a row's own embedding returns it as top-1
        // with distance ~0, i.e. score ~1.
        let results = store
            .search("docs", &target.embedding, 2, None)
            .await
            .unwrap();
        assert_eq!(results[0].chunk.document_id, "hit");
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_search_filter_applied_before_ranking() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .create_table("docs", &TableSchema::documentation(DIMS))
            .await
            .unwrap();

        let rows = vec![
            chunk("near", "https://docs.example.com/api/near", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("far", "https://other.example.com/far", vec![0.99, 0.01, 0.0, 0.0]),
        ];
        store.insert("docs", &rows).await.unwrap();

        let filter = SearchFilter::by_source_prefix("https://docs.example.com/");
        let results = store
            .search("docs", &[1.0, 0.0, 0.0, 0.0], 1, Some(&filter))
            .await
            .unwrap();

        // k=1 with the filter still finds the in-prefix row even though an
        // out-of-prefix row is almost as close.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.document_id, "near");
    }

    #[tokio::test]
    async fn test_search_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let results = store.search("nope", &[0.0; DIMS], 3, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_query_vector_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .create_table("docs", &TableSchema::documentation(DIMS))
            .await
            .unwrap();

        let err = store.search("docs", &[0.0; 2], 3, None).await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
