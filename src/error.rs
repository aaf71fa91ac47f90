//! Error types for the tablemem persistence layer
//!
//! This module provides structured error handling using thiserror. Validation
//! failures are raised locally before any network call; store failures are
//! wrapped with operation context and never retried automatically.

use thiserror::Error;

/// Main error type for tablemem operations
#[derive(Error, Debug)]
pub enum TablememError {
    /// Local validation failure, raised before any request is issued
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entity or secondary-index match is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Secondary index returned more than one row for a logically unique key
    #[error("ambiguous secondary index entry: {0}")]
    AmbiguousIndex(String),

    /// Wrapped store/driver failure with operation context
    #[error("store operation failed: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A bulk mutation stopped partway; `applied` counts the mutations
    /// committed before the failing chunk
    #[error("batch mutation aborted after {applied} applied: {source}")]
    BatchFailed {
        applied: usize,
        #[source]
        source: Box<TablememError>,
    },
}

impl TablememError {
    /// Wrap a driver failure with operation context
    pub fn store(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TablememError::Store {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Prefix store failures with the operation that issued them.
    ///
    /// NotFound / AmbiguousIndex / Validation pass through unchanged so
    /// callers can still match on them.
    pub(crate) fn with_context(self, context: &str) -> Self {
        match self {
            TablememError::Store {
                context: inner,
                source,
            } => TablememError::Store {
                context: format!("{context}: {inner}"),
                source,
            },
            other => other,
        }
    }
}

/// Result type alias for tablemem operations
pub type Result<T> = std::result::Result<T, TablememError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TablememError::NotFound("session user_id=u1".to_string());
        assert_eq!(err.to_string(), "not found: session user_id=u1");

        let err = TablememError::BatchFailed {
            applied: 200,
            source: Box::new(TablememError::store("batch write", "connection reset")),
        };
        assert!(err.to_string().contains("after 200 applied"));
    }

    #[test]
    fn test_with_context_wraps_store_only() {
        let err = TablememError::store("range query", "timeout").with_context("list sessions");
        assert!(matches!(err, TablememError::Store { ref context, .. } if context.starts_with("list sessions")));

        let err = TablememError::NotFound("x".into()).with_context("get session");
        assert!(matches!(err, TablememError::NotFound(_)));
    }
}
