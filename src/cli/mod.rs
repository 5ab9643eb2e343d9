//! CLI - thin shell around the ingestion and query pipeline.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::crawler::{CrawlRequest, SiteCrawler};
use crate::embedding::{EmbeddingProvider, OpenAiEmbedding};
use crate::error::RagError;
use crate::generation::OpenAiGenerator;
use crate::index::{IndexBuilder, IndexHandle, IndexState};
use crate::knowledge::{default_chunker, KnowledgeStore, LanceKnowledgeStore, TableSchema};
use crate::query::QueryEngine;

// ============================================================================
// CLI definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docqa")]
#[command(version, about = "Question answering over a crawled documentation site", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl the configured site and build the knowledge index
    Build {
        /// Drop the existing table and rebuild from scratch
        #[arg(long)]
        fresh: bool,
    },

    /// Ask a question against the index (builds it first if needed)
    Ask {
        /// The question
        question: String,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long, default_value = "4")]
        top_k: usize,

        /// Only retrieve chunks whose source URL starts with this prefix
        #[arg(long)]
        source_prefix: Option<String>,
    },

    /// Show configuration and index status
    Status,
}

// ============================================================================
// Pipeline wiring
// ============================================================================

struct Pipeline {
    config: AppConfig,
    store: Arc<LanceKnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    handle: IndexHandle,
}

impl Pipeline {
    async fn from_config(config: AppConfig) -> Result<Self, RagError> {
        let store = Arc::new(
            LanceKnowledgeStore::open(&config.data_dir.join("knowledge.lance")).await?,
        );
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedding::with_dimension(
            config.openai_api_key.clone(),
            config.embedding_dims,
        )?);

        let request = CrawlRequest {
            seed_url: config.seed_url.clone(),
            include_patterns: config.include_patterns.clone(),
            page_limit: config.page_limit,
            main_content_only: config.main_content_only,
        };
        let builder = IndexBuilder::new(
            Arc::new(SiteCrawler::new()?),
            embedder.clone(),
            store.clone(),
            default_chunker(),
            TableSchema::documentation(config.embedding_dims),
            config.table_name.clone(),
            request,
        )?;

        Ok(Self {
            config,
            store,
            embedder,
            handle: IndexHandle::new(builder),
        })
    }

    fn query_engine(&self, top_k: usize) -> Result<QueryEngine, RagError> {
        let generator = Arc::new(OpenAiGenerator::new(self.config.openai_api_key.clone())?);
        Ok(QueryEngine::new(
            self.embedder.clone(),
            generator,
            self.store.clone(),
            self.config.table_name.clone(),
        )
        .with_top_k(top_k))
    }
}

// ============================================================================
// CLI runner
// ============================================================================

pub async fn run(cli: Cli) -> Result<(), RagError> {
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Build { fresh } => cmd_build(config, fresh).await,
        Commands::Ask {
            question,
            top_k,
            source_prefix,
        } => cmd_ask(config, &question, top_k, source_prefix).await,
        Commands::Status => cmd_status(config).await,
    }
}

async fn cmd_build(config: AppConfig, fresh: bool) -> Result<(), RagError> {
    let pipeline = Pipeline::from_config(config).await?;

    if fresh {
        pipeline
            .store
            .drop_table(&pipeline.config.table_name)
            .await?;
        println!("[*] Dropped table '{}'", pipeline.config.table_name);
    }

    println!(
        "[*] Crawling {} (limit {} pages)...",
        pipeline.config.seed_url, pipeline.config.page_limit
    );
    let index = pipeline.handle.ensure_built().await?;

    println!(
        "[OK] Index ready: {} chunks in table '{}' (dims {})",
        index.chunk_count, index.table_name, index.dims
    );
    Ok(())
}

async fn cmd_ask(
    config: AppConfig,
    question: &str,
    top_k: usize,
    source_prefix: Option<String>,
) -> Result<(), RagError> {
    let pipeline = Pipeline::from_config(config).await?;

    if !pipeline.handle.is_ready() {
        println!(
            "[*] Index is {}; building...",
            describe_state(&pipeline.handle.state())
        );
        pipeline.handle.ensure_built().await?;
    }

    let engine = pipeline.query_engine(top_k)?;
    let filter = source_prefix.map(crate::knowledge::SearchFilter::by_source_prefix);
    let result = engine.answer_filtered(question, filter.as_ref()).await?;

    println!("\n{}\n", result.answer);

    if result.is_grounded() {
        println!("Sources:");
        for (i, source) in result.sources.iter().enumerate() {
            let title = source.title.as_deref().unwrap_or("untitled");
            println!(
                "  {}. [{:.4}] {} - {}",
                i + 1,
                source.score,
                title,
                source.source_url
            );
        }
    }
    Ok(())
}

async fn cmd_status(config: AppConfig) -> Result<(), RagError> {
    println!("docqa v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] Seed URL: {}", config.seed_url);
    if config.include_patterns.is_empty() {
        println!("    Include: (all same-host pages)");
    } else {
        println!("    Include: {}", config.include_patterns.join(", "));
    }
    println!("    Page limit: {}", config.page_limit);
    println!("    Data directory: {}", config.data_dir.display());
    println!(
        "    Embedding dims: {} (table '{}')",
        config.embedding_dims, config.table_name
    );

    let store = LanceKnowledgeStore::open(&config.data_dir.join("knowledge.lance")).await?;
    let count = store.count(&config.table_name).await?;
    if count == 0 {
        println!("[!] Index is empty; run `docqa build`");
    } else {
        println!("[OK] Indexed chunks: {}", count);
    }
    Ok(())
}

/// Human-readable index state for dashboards and logs.
pub fn describe_state(state: &IndexState) -> String {
    match state {
        IndexState::Uninitialized => "not yet built".to_string(),
        IndexState::Building(stage) => format!("building ({})", stage),
        IndexState::Ready => "ready".to_string(),
        IndexState::Failed { stage, message } => match stage {
            Some(stage) => format!("failed during {}: {}", stage, message),
            None => format!("failed: {}", message),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
