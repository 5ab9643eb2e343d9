//! Error taxonomy for the ingestion and query pipeline.
//!
//! Build-phase errors identify the stage that caused them so a failed
//! build can be reported as `Failed(stage)` rather than a bare message.
//! "Insufficient context" is deliberately absent: an answer with zero
//! sources is a valid `QueryResult`, not an error.

use std::fmt;

use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, connection resets, 5xx responses. A later retry may succeed.
    Transient,
    /// Bad seed URL, auth rejection, 4xx responses. Retrying cannot help.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Pipeline stage an index build was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Crawling,
    Embedding,
    Persisting,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Crawling => write!(f, "crawling"),
            BuildStage::Embedding => write!(f, "embedding"),
            BuildStage::Persisting => write!(f, "persisting"),
        }
    }
}

// ============================================================================
// RagError
// ============================================================================

/// Errors surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// The page source failed to produce documents.
    #[error("crawl failed ({kind}): {message}")]
    CrawlFailed { kind: FailureKind, message: String },

    /// Invalid or missing configuration. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding provider failed for a batch. Aborts the build.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The answer-generation provider failed. Query-phase only.
    #[error("answer generation failed: {0}")]
    GenerationFailed(String),

    /// The vector store rejected or could not serve a call.
    #[error("knowledge store unavailable: {0}")]
    StoreUnavailable(String),

    /// Empty or malformed question.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl RagError {
    /// Shorthand for a transient crawl failure.
    pub fn crawl_transient(message: impl Into<String>) -> Self {
        RagError::CrawlFailed {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent crawl failure.
    pub fn crawl_permanent(message: impl Into<String>) -> Self {
        RagError::CrawlFailed {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// The build stage this error belongs to, if it is a build-phase error.
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            RagError::CrawlFailed { .. } => Some(BuildStage::Crawling),
            RagError::EmbeddingFailed(_) => Some(BuildStage::Embedding),
            RagError::StoreUnavailable(_) => Some(BuildStage::Persisting),
            _ => None,
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::CrawlFailed {
                kind: FailureKind::Transient,
                ..
            } | RagError::StoreUnavailable(_)
        )
    }

    /// Process exit code for the CLI shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            RagError::Configuration(_) => 2,
            RagError::CrawlFailed { .. } => 3,
            RagError::EmbeddingFailed(_) => 4,
            RagError::StoreUnavailable(_) => 5,
            RagError::GenerationFailed(_) => 6,
            RagError::InvalidQuery(_) => 64,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attribution() {
        assert_eq!(
            RagError::crawl_transient("timeout").stage(),
            Some(BuildStage::Crawling)
        );
        assert_eq!(
            RagError::EmbeddingFailed("429".into()).stage(),
            Some(BuildStage::Embedding)
        );
        assert_eq!(
            RagError::StoreUnavailable("conn refused".into()).stage(),
            Some(BuildStage::Persisting)
        );
        assert_eq!(RagError::Configuration("missing key".into()).stage(), None);
        assert_eq!(RagError::InvalidQuery("empty".into()).stage(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(RagError::crawl_transient("503").is_transient());
        assert!(!RagError::crawl_permanent("404").is_transient());
        assert!(RagError::StoreUnavailable("reset".into()).is_transient());
        assert!(!RagError::Configuration("bad dims".into()).is_transient());
    }

    #[test]
    fn test_exit_codes_distinct() {
        let errors = [
            RagError::Configuration("a".into()),
            RagError::crawl_permanent("b"),
            RagError::EmbeddingFailed("c".into()),
            RagError::StoreUnavailable("d".into()),
            RagError::GenerationFailed("e".into()),
            RagError::InvalidQuery("f".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
