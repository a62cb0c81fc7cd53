//! Engine Error Types
//!
//! High-level errors for save, remove, find, and index maintenance.
//! Rejected field writes are not here: those accumulate silently on the
//! document instance as `SetError`s. Everything that aborts an operation
//! or surfaces from the store flows through [`OdmError`].

use thiserror::Error;

use crate::db::StoreError;
use crate::models::hooks::HookError;
use crate::models::keys::KeyError;
use crate::models::schema::SchemaError;

/// Engine operation errors
#[derive(Error, Debug)]
pub enum OdmError {
    /// Propagated store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid key value, raised before any store call
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Schema failed to compile at model definition
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A pre-hook aborted the operation
    #[error(transparent)]
    Middleware(#[from] HookError),

    /// No model registered under this name
    #[error("Model not found: {name}")]
    ModelNotFound { name: String },

    /// A model name was registered twice
    #[error("Model already defined: {name}")]
    ModelAlreadyDefined { name: String },

    /// The held CAS no longer matches the stored document
    #[error("Concurrent modification of document: {key}")]
    ConcurrentModification { key: String },

    /// A lookup document points at a primary that no longer exists
    #[error("Dangling index entry at {ref_key} pointing to {target}")]
    DanglingIndex { ref_key: String, target: String },

    /// `find_by` was called for a field that carries no index
    #[error("Model {model} has no index on field '{field}'")]
    UnknownIndex { model: String, field: String },

    /// The embedded-document graph revisited an instance
    #[error("Cyclic embedding detected at field '{field}' of model {model}")]
    CyclicEmbedding { model: String, field: String },

    /// The document cannot derive a storage key
    #[error("Document of model {model} has no key value")]
    MissingKey { model: String },

    /// Aggregated lookup-document failures from a save with
    /// `wait_for_index`
    #[error("Index maintenance failed for {} lookup document(s)", .0.len())]
    IndexFailed(Vec<OdmError>),
}

impl OdmError {
    /// Create a model-not-found error
    pub fn model_not_found(name: impl Into<String>) -> Self {
        Self::ModelNotFound { name: name.into() }
    }

    /// Create a concurrent-modification error
    pub fn concurrent_modification(key: impl Into<String>) -> Self {
        Self::ConcurrentModification { key: key.into() }
    }

    /// Create a dangling-index error
    pub fn dangling_index(ref_key: impl Into<String>, target: impl Into<String>) -> Self {
        Self::DanglingIndex {
            ref_key: ref_key.into(),
            target: target.into(),
        }
    }

    /// Create a cyclic-embedding error
    pub fn cyclic_embedding(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::CyclicEmbedding {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Map a store error on `key`, turning CAS conflicts into
    /// [`OdmError::ConcurrentModification`]
    pub(crate) fn from_store_on(key: &str, err: StoreError) -> Self {
        if err.is_cas_mismatch() {
            Self::concurrent_modification(key)
        } else {
            Self::Store(err)
        }
    }
}
