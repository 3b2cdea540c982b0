//! Error taxonomy for the configuration core.
//!
//! Every fallible operation in `core` returns [`OpError`]. The kinds are
//! deliberately machine-readable: the dispatch front-end maps them to
//! user-facing strings, the core never does. Higher layers may enrich a
//! message with the operation name and target path but never swallow a
//! lower-layer kind.
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result alias used across the core.
pub type OpResult<T> = Result<T, OpError>;

/// Enumerated error kinds, mirroring the operational failure modes of the
/// managed configuration directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpError {
    /// A request field failed validation. Raised before any I/O.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// A named file does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A target exists when it must not, or a unique marker would be
    /// duplicated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The on-disk file does not match the structural invariants the
    /// requested surgery relies on. No mutation has been performed.
    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    /// Missing template, undefined variable, or a post-render structural
    /// check failed. No mutation has been performed.
    #[error("template error: {0}")]
    Template(String),

    /// A filesystem operation failed after validation. `ENOSPC` is always
    /// surfaced unchanged and never retried.
    #[error("I/O failure during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl OpError {
    /// Shorthand for an [`OpError::InvalidInput`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the name of the operation that hit it.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// True when the underlying cause is the filesystem running out of
    /// space. Callers must never retry in that case.
    pub fn is_storage_full(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::StorageFull
        )
    }
}

/// Fail fast when the ambient cancellation signal has fired.
///
/// Checked before starting work, before lock acquisition, before every I/O
/// call, and between transaction steps.
pub fn ensure_live(cancel: &CancellationToken) -> OpResult<()> {
    if cancel.is_cancelled() {
        Err(OpError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_is_detected() {
        let err = OpError::io(
            "write",
            std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"),
        );
        assert!(err.is_storage_full());

        let other = OpError::io("write", std::io::Error::other("boom"));
        assert!(!other.is_storage_full());
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        assert!(ensure_live(&token).is_ok());
        token.cancel();
        assert!(matches!(ensure_live(&token), Err(OpError::Cancelled)));
    }
}
