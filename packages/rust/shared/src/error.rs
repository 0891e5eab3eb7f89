//! Error types for DocRAG.
//!
//! Library crates use [`DocRagError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Fetch and embedding errors carry a kind that drives the retry policy:
//! transient failures are retried with backoff, permanent/exhausted failures
//! are surfaced to the owning crawl job.

use std::path::PathBuf;

/// Whether a fetch failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeouts, connection failures, HTTP 5xx. Retryable.
    Transient,
    /// HTTP 4xx, malformed content. Not retryable.
    Permanent,
}

/// Embedding failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingErrorKind {
    /// Timeouts, HTTP 5xx from the embedding service. Retryable.
    Transient,
    /// Retry budget spent or a non-retryable API rejection. Job-fatal.
    Exhausted,
}

/// Top-level error type for all DocRAG operations.
#[derive(Debug, thiserror::Error)]
pub enum DocRagError {
    /// Failure fetching a page during crawl.
    #[error("fetch error ({kind:?}) for {url}: {message}")]
    Fetch {
        url: String,
        kind: FetchErrorKind,
        message: String,
    },

    /// Failure from the embedding service.
    #[error("embedding error ({kind:?}): {message}")]
    Embedding {
        kind: EmbeddingErrorKind,
        message: String,
    },

    /// Vector/keyword store unavailable or a statement failed.
    #[error("index error: {0}")]
    Index(String),

    /// Operation referenced a site id that does not exist.
    #[error("site not found: {site_id}")]
    NotFound { site_id: String },

    /// Malformed URL or other invalid input, rejected before scheduling work.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocRagError>;

impl DocRagError {
    /// Create a transient fetch error.
    pub fn fetch_transient(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            kind: FetchErrorKind::Transient,
            message: msg.into(),
        }
    }

    /// Create a permanent fetch error.
    pub fn fetch_permanent(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            kind: FetchErrorKind::Permanent,
            message: msg.into(),
        }
    }

    /// Create a transient embedding error.
    pub fn embedding_transient(msg: impl Into<String>) -> Self {
        Self::Embedding {
            kind: EmbeddingErrorKind::Transient,
            message: msg.into(),
        }
    }

    /// Create an exhausted (job-fatal) embedding error.
    pub fn embedding_exhausted(msg: impl Into<String>) -> Self {
        Self::Embedding {
            kind: EmbeddingErrorKind::Exhausted,
            message: msg.into(),
        }
    }

    /// Create a not-found error for an unknown site id.
    pub fn not_found(site_id: impl Into<String>) -> Self {
        Self::NotFound {
            site_id: site_id.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Mark a spent retry budget: a transient embedding failure becomes
    /// job-fatal `Exhausted`; every other error passes through unchanged.
    pub fn into_exhausted(self) -> Self {
        match self {
            Self::Embedding {
                kind: EmbeddingErrorKind::Transient,
                message,
            } => Self::Embedding {
                kind: EmbeddingErrorKind::Exhausted,
                message,
            },
            other => other,
        }
    }

    /// Classification hook used by [`crate::RetryPolicy`]: only transient
    /// fetch/embedding failures are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { kind, .. } => *kind == FetchErrorKind::Transient,
            Self::Embedding { kind, .. } => *kind == EmbeddingErrorKind::Transient,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocRagError::fetch_permanent("https://example.com/x", "HTTP 404");
        assert!(err.to_string().contains("Permanent"));
        assert!(err.to_string().contains("https://example.com/x"));

        let err = DocRagError::not_found("abc-123");
        assert_eq!(err.to_string(), "site not found: abc-123");
    }

    #[test]
    fn exhaustion_upgrade_targets_embedding_errors() {
        let upgraded = DocRagError::embedding_transient("503").into_exhausted();
        assert!(matches!(
            upgraded,
            DocRagError::Embedding {
                kind: EmbeddingErrorKind::Exhausted,
                ..
            }
        ));
        // Fetch errors keep their classification.
        assert!(
            DocRagError::fetch_transient("u", "timeout")
                .into_exhausted()
                .is_transient()
        );
    }

    #[test]
    fn transient_classification() {
        assert!(DocRagError::fetch_transient("u", "timeout").is_transient());
        assert!(DocRagError::embedding_transient("503").is_transient());
        assert!(!DocRagError::fetch_permanent("u", "404").is_transient());
        assert!(!DocRagError::embedding_exhausted("gave up").is_transient());
        assert!(!DocRagError::validation("bad url").is_transient());
        assert!(!DocRagError::Index("closed".into()).is_transient());
    }
}
