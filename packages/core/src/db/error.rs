//! Store Error Types
//!
//! The closed set of failure kinds a [`crate::db::Store`] implementation may
//! report. Engine code branches on these variants (miss vs. conflict vs.
//! retryable), so backends must map their native errors onto this set and
//! nothing else.

use thiserror::Error;

/// Store operation errors
///
/// `NotFound` and `CasMismatch` are ordinary protocol outcomes the engine
/// handles inline; `Temporary` and `Timeout` are candidates for bounded
/// retry; `Fatal` always propagates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No document exists at the requested key
    #[error("Document not found: {key}")]
    NotFound { key: String },

    /// A compare-and-swap token did not match the stored document
    #[error("CAS mismatch for document: {key}")]
    CasMismatch { key: String },

    /// Transient failure (server busy, document locked); safe to retry
    #[error("Temporary store failure: {context}")]
    Temporary { context: String },

    /// The operation did not complete within the store's deadline
    #[error("Store operation timed out: {context}")]
    Timeout { context: String },

    /// Unrecoverable failure (connection lost, corrupt response)
    #[error("Fatal store failure: {context}")]
    Fatal { context: String },
}

impl StoreError {
    /// Create a not-found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a CAS mismatch error
    pub fn cas_mismatch(key: impl Into<String>) -> Self {
        Self::CasMismatch { key: key.into() }
    }

    /// Create a temporary error
    pub fn temporary(context: impl Into<String>) -> Self {
        Self::Temporary {
            context: context.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
        }
    }

    /// Create a fatal error
    pub fn fatal(context: impl Into<String>) -> Self {
        Self::Fatal {
            context: context.into(),
        }
    }

    /// Whether this error is safe to retry after a short delay
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary { .. })
    }

    /// Whether this error is a plain miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_cas_mismatch(&self) -> bool {
        matches!(self, Self::CasMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(StoreError::not_found("k").is_not_found());
        assert!(StoreError::cas_mismatch("k").is_cas_mismatch());
        assert!(StoreError::temporary("busy").is_temporary());
        assert!(!StoreError::timeout("slow").is_temporary());
        assert!(!StoreError::fatal("gone").is_temporary());
    }

    #[test]
    fn display_includes_key() {
        let err = StoreError::not_found("user::bob");
        assert!(err.to_string().contains("user::bob"));
    }
}
