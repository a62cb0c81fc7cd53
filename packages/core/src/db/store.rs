//! Store Trait - Key-Value Document Store Abstraction
//!
//! This module defines the `Store` trait that abstracts per-key document
//! operations for the engine. The trait enables multiple backend
//! implementations (a network client, the in-process [`crate::db::MemoryStore`])
//! without changing engine or index-maintenance logic.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every method is async; each call is a suspension
//!    point for the cooperatively scheduled engine tasks
//! 2. **Closed error set**: all methods fail with [`StoreError`] so the
//!    engine can classify misses, CAS conflicts, and retryable failures
//! 3. **Opaque CAS**: [`Cas`] tokens are compared, never interpreted

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::error::StoreError;

/// Opaque compare-and-swap token
///
/// Returned by every read and successful write. The engine only ever hands
/// it back verbatim; the inner representation belongs to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cas(u64);

impl Cas {
    /// Wrap a backend-native token value
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Backend-native token value, for backends that need it back
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Cas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cas:{:#x}", self.0)
    }
}

/// A fetched document: JSON body plus its current CAS token
#[derive(Debug, Clone)]
pub struct Fetched {
    pub value: Value,
    pub cas: Cas,
}

/// Result of a multi-key fetch
///
/// `hits` preserves the order the backend returned them in; `misses` lists
/// the requested keys that had no document, in request order.
#[derive(Debug, Clone, Default)]
pub struct MultiFetch {
    pub hits: Vec<(String, Fetched)>,
    pub misses: Vec<String>,
}

impl MultiFetch {
    /// Look up a hit by key
    pub fn hit(&self, key: &str) -> Option<&Fetched> {
        self.hits.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Options for write operations
///
/// `cas` turns the write into a compare-and-swap; `expiry` sets a
/// time-to-live on the document; `persist_to`/`replicate_to` request
/// durability from backends that support it (ignored otherwise).
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub cas: Option<Cas>,
    pub expiry: Option<Duration>,
    pub persist_to: Option<u8>,
    pub replicate_to: Option<u8>,
}

impl WriteOptions {
    /// Write guarded by the given CAS token
    pub fn with_cas(cas: Option<Cas>) -> Self {
        Self {
            cas,
            ..Self::default()
        }
    }
}

/// Abstraction over a document-oriented key-value store
///
/// Implementations must be `Send + Sync`; a single client instance is
/// shared by every engine task. All mutation results carry the new CAS
/// token so callers can chain optimistic updates.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one document
    ///
    /// # Errors
    ///
    /// `NotFound` when no document exists at `key`.
    async fn get(&self, key: &str) -> Result<Fetched, StoreError>;

    /// Fetch many documents in one round trip
    ///
    /// Missing keys are reported in [`MultiFetch::misses`], never as an
    /// error.
    async fn get_multi(&self, keys: &[String]) -> Result<MultiFetch, StoreError>;

    /// Create a document; fails with `CasMismatch` if the key exists
    async fn insert(&self, key: &str, value: Value, opts: WriteOptions)
        -> Result<Cas, StoreError>;

    /// Replace an existing document; fails with `NotFound` if absent
    async fn replace(
        &self,
        key: &str,
        value: Value,
        opts: WriteOptions,
    ) -> Result<Cas, StoreError>;

    /// Create or replace a document
    ///
    /// When `opts.cas` is set and a document exists, the write only
    /// succeeds if the token matches.
    async fn upsert(&self, key: &str, value: Value, opts: WriteOptions)
        -> Result<Cas, StoreError>;

    /// Delete a document, optionally guarded by a CAS token
    async fn remove(&self, key: &str, cas: Option<Cas>) -> Result<(), StoreError>;

    /// Atomically adjust a numeric document by `delta`
    ///
    /// When the document is absent and `initial` is given, the counter is
    /// created holding `initial` (not `initial + delta`).
    async fn counter(&self, key: &str, delta: i64, initial: Option<i64>)
        -> Result<i64, StoreError>;

    /// Fetch a document and lock it for `ttl`
    ///
    /// While locked, writes that do not present the returned CAS fail as
    /// `Temporary`. The lock is released by a guarded write, an
    /// [`Store::unlock`], or TTL expiry.
    async fn get_and_lock(&self, key: &str, ttl: Duration) -> Result<Fetched, StoreError>;

    /// Release a lock taken by [`Store::get_and_lock`]
    async fn unlock(&self, key: &str, cas: Cas) -> Result<(), StoreError>;
}
