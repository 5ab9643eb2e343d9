//! Startup configuration.
//!
//! Every externally supplied setting is read from the environment exactly
//! once and validated before the pipeline makes any network call. Nothing
//! else in the crate reads environment variables.

use std::path::PathBuf;

use url::Url;

use crate::error::RagError;

/// Default embedding dimensionality (OpenAI text-embedding-3-small).
pub const DEFAULT_EMBED_DIMS: usize = 1536;

/// Default knowledge table name.
pub const DEFAULT_TABLE: &str = "documentation";

/// Default number of pages fetched per crawl.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Data directory (~/.docqa/) holding the LanceDB dataset.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docqa")
}

// ============================================================================
// AppConfig
// ============================================================================

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Crawl entry point.
    pub seed_url: String,
    /// Glob patterns a discovered link must match to be crawled. Empty = all.
    pub include_patterns: Vec<String>,
    /// Upper bound on pages fetched per crawl. Must be >= 1.
    pub page_limit: usize,
    /// Strip navigation/boilerplate, keep only the main content region.
    pub main_content_only: bool,
    /// Directory holding the LanceDB dataset.
    pub data_dir: PathBuf,
    /// Knowledge table name.
    pub table_name: String,
    /// Embedding vector dimensionality. Must match the provider's output.
    pub embedding_dims: usize,
    /// OpenAI API key, used for both embedding and answer generation.
    pub openai_api_key: String,
}

impl AppConfig {
    /// Read configuration from the environment and validate it.
    ///
    /// Variables: `DOCQA_SEED_URL` (required), `DOCQA_INCLUDE`
    /// (comma-separated globs), `DOCQA_PAGE_LIMIT`, `DOCQA_MAIN_CONTENT_ONLY`,
    /// `DOCQA_DATA_DIR`, `DOCQA_TABLE`, `DOCQA_EMBED_DIMS`, `OPENAI_API_KEY`
    /// (required).
    pub fn from_env() -> Result<Self, RagError> {
        let seed_url = require_env("DOCQA_SEED_URL")?;
        let openai_api_key = require_env("OPENAI_API_KEY")?;

        let include_patterns = std::env::var("DOCQA_INCLUDE")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        let page_limit = parse_env("DOCQA_PAGE_LIMIT", DEFAULT_PAGE_LIMIT)?;
        let embedding_dims = parse_env("DOCQA_EMBED_DIMS", DEFAULT_EMBED_DIMS)?;

        let main_content_only = std::env::var("DOCQA_MAIN_CONTENT_ONLY")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let data_dir = std::env::var("DOCQA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let table_name =
            std::env::var("DOCQA_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string());

        let config = Self {
            seed_url,
            include_patterns,
            page_limit,
            main_content_only,
            data_dir,
            table_name,
            embedding_dims,
            openai_api_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid field values. Called before any external call.
    pub fn validate(&self) -> Result<(), RagError> {
        Url::parse(&self.seed_url).map_err(|e| {
            RagError::Configuration(format!("invalid seed URL '{}': {}", self.seed_url, e))
        })?;

        if self.page_limit == 0 {
            return Err(RagError::Configuration(
                "page limit must be at least 1".into(),
            ));
        }
        if self.embedding_dims == 0 {
            return Err(RagError::Configuration(
                "embedding dimensionality must be nonzero".into(),
            ));
        }
        if self.table_name.trim().is_empty() {
            return Err(RagError::Configuration("table name is empty".into()));
        }
        if self.openai_api_key.trim().is_empty() {
            return Err(RagError::Configuration("OpenAI API key is empty".into()));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String, RagError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RagError::Configuration(format!(
            "required environment variable {} is not set",
            name
        ))),
    }
}

fn parse_env(name: &str, default: usize) -> Result<usize, RagError> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| RagError::Configuration(format!("{} is not a number: '{}'", name, v))),
        Err(_) => Ok(default),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            seed_url: "https://docs.example.com/guide".into(),
            include_patterns: vec!["guide/*".into()],
            page_limit: 10,
            main_content_only: true,
            data_dir: PathBuf::from("/tmp/docqa-test"),
            table_name: DEFAULT_TABLE.into(),
            embedding_dims: DEFAULT_EMBED_DIMS,
            openai_api_key: "sk-test".into(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_bad_seed_url() {
        let mut config = valid_config();
        config.seed_url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_page_limit() {
        let mut config = valid_config();
        config.page_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_dims() {
        let mut config = valid_config();
        config.embedding_dims = 0;
        assert!(matches!(
            config.validate(),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = valid_config();
        config.openai_api_key = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(RagError::Configuration(_))
        ));
    }
}
