//! Error types for atlas-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the subsystem that failed. Recoverable per-file and per-stage errors
//! are captured into stats or warnings by the orchestrator; only the
//! fatal kinds propagate out of an operation.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all atlas-core operations.
#[derive(Debug, Error)]
pub enum AtlasError {
    // ---- Recoverable (operation failed, system healthy) ----
    /// A single file failed to parse. The rest of the index is fine.
    #[error("parse error for {path}: {message}")]
    Parse {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Persisting a single file failed after the retry.
    #[error("persist error for {path}: {message}")]
    Persist {
        /// Path to the file whose rows could not be written.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Embedding generation failed for a span of text.
    #[error("embedding error: {message}")]
    Embed {
        /// Human-readable error description.
        message: String,
    },

    /// Requested entity was not found in the index.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    /// A tool/query argument failed validation. Raised before side effects.
    #[error("invalid argument `{field}`: {message}")]
    QueryValidation {
        /// Name of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A retrieval stage failed. The pipeline may degrade to partial results.
    #[error("query stage `{stage}` failed: {message}")]
    QueryExecution {
        /// Which of the seven stages failed.
        stage: &'static str,
        /// Human-readable error description.
        message: String,
    },

    // ---- Degraded (system works with reduced capability) ----
    /// Embedding backend is unreachable or persistently failing.
    #[error("embedding backend unavailable: {reason}")]
    EmbedderUnavailable {
        /// Why the backend could not be used.
        reason: String,
    },

    /// Summary backend is unreachable. Rule-based summaries still work.
    #[error("summary backend unavailable: {reason}")]
    SummaryUnavailable {
        /// Why the backend could not be used.
        reason: String,
    },

    // ---- Fatal (the current operation cannot proceed) ----
    /// The repository root could not be read. Aborts the indexing request.
    #[error("discovery failed for {root}: {message}")]
    DiscoveryFailed {
        /// Root path that could not be traversed.
        root: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Indexing aborted by a non-file-scoped failure (schema check,
    /// discovery, cancellation of the whole request).
    #[error("indexing aborted: {reason}")]
    IndexingAborted {
        /// Why the pipeline stopped.
        reason: String,
    },

    /// Store is unreachable or failed to open.
    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        /// Why the store could not be used.
        reason: String,
    },

    /// Store schema does not match the configuration (missing tables or
    /// embedding-dimension mismatch). Fatal at init.
    #[error("store schema mismatch: {details}")]
    SchemaMismatch {
        /// Diagnostic details, including expected vs found dimensions.
        details: String,
    },

    /// Configuration is invalid or missing required fields.
    #[error("configuration error in `{field}`: {details}")]
    Config {
        /// First offending field.
        field: String,
        /// What's wrong with it.
        details: String,
    },

    /// The operation was canceled via its cancellation token.
    #[error("operation canceled")]
    Canceled,

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AtlasError {
    /// True for the kinds that abort the surrounding operation rather than
    /// being recorded and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryFailed { .. }
                | Self::IndexingAborted { .. }
                | Self::StoreUnavailable { .. }
                | Self::SchemaMismatch { .. }
                | Self::Config { .. }
                | Self::Canceled
        )
    }

    /// Two-tier user-facing message: a short headline plus an optional
    /// resolution hint.
    pub fn headline_and_hint(&self) -> (String, Option<&'static str>) {
        let hint = match self {
            Self::SchemaMismatch { .. } => {
                Some("re-create the index with the configured embedding dimension, or fix ATLAS_EMBED_DIM")
            }
            Self::EmbedderUnavailable { .. } => {
                Some("check ATLAS_EMBEDDER_URL and that the embedding service is running")
            }
            Self::StoreUnavailable { .. } => Some("check the database path and permissions"),
            Self::DiscoveryFailed { .. } => Some("check that the repository path exists and is readable"),
            _ => None,
        };
        (self.to_string(), hint)
    }
}

/// Convenience type alias for Results in atlas-core.
pub type AtlasResult<T> = Result<T, AtlasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_are_fatal() {
        assert!(AtlasError::SchemaMismatch { details: "dim".into() }.is_fatal());
        assert!(AtlasError::Canceled.is_fatal());
        assert!(!AtlasError::Parse { path: "x.ts".into(), message: "bad".into() }.is_fatal());
        assert!(!AtlasError::Embed { message: "timeout".into() }.is_fatal());
    }

    #[test]
    fn schema_mismatch_carries_a_hint() {
        let (headline, hint) = AtlasError::SchemaMismatch { details: "expected 1024, found 768".into() }
            .headline_and_hint();
        assert!(headline.contains("768"));
        assert!(hint.is_some());
    }
}
