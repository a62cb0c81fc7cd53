//! In-Memory Store Backend
//!
//! A process-local [`Store`] implementation with real CAS semantics,
//! counters, and lock tokens. It backs the test suites and doubles as an
//! embedded backend for tools that do not need a server.
//!
//! CAS tokens are drawn from a single monotonically increasing sequence,
//! so a token never repeats across keys or rewrites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::db::error::StoreError;
use crate::db::store::{Cas, Fetched, MultiFetch, Store, WriteOptions};

struct Lock {
    cas: Cas,
    until: Instant,
}

struct Entry {
    value: Value,
    cas: Cas,
    expires: Option<Instant>,
    lock: Option<Lock>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires.map(|at| Instant::now() < at).unwrap_or(true)
    }

    fn lock_cas(&self) -> Option<Cas> {
        self.lock
            .as_ref()
            .filter(|l| Instant::now() < l.until)
            .map(|l| l.cas)
    }
}

/// In-process key-value document store
///
/// All operations take a single mutex; critical sections never await, so
/// the store is safe to share across tokio tasks.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_cas(&self) -> Cas {
        Cas::new(self.sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Number of live documents, for test assertions
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("store mutex poisoned");
        entries.values().filter(|e| e.live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a document body without touching locks or CAS
    pub fn peek(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().expect("store mutex poisoned");
        entries
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.value.clone())
    }

    fn write(
        &self,
        key: &str,
        value: Value,
        opts: WriteOptions,
        require_existing: Option<bool>,
    ) -> Result<Cas, StoreError> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let existing = entries.get(key).filter(|e| e.live());

        match (require_existing, existing.is_some()) {
            (Some(false), true) => return Err(StoreError::cas_mismatch(key)),
            (Some(true), false) => return Err(StoreError::not_found(key)),
            _ => {}
        }

        if let Some(entry) = existing {
            if let Some(lock_cas) = entry.lock_cas() {
                if opts.cas != Some(lock_cas) {
                    return Err(StoreError::temporary(format!("document locked: {key}")));
                }
            } else if let Some(cas) = opts.cas {
                if cas != entry.cas {
                    return Err(StoreError::cas_mismatch(key));
                }
            }
        } else if opts.cas.is_some() && require_existing.is_none() {
            // Guarded upsert of a missing document: nothing to compare.
            return Err(StoreError::not_found(key));
        }

        let cas = self.next_cas();
        let expires = opts.expiry.map(|ttl| Instant::now() + ttl);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                cas,
                expires,
                lock: None,
            },
        );
        debug!(key, %cas, "memory store write");
        Ok(cas)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Fetched, StoreError> {
        let entries = self.entries.lock().expect("store mutex poisoned");
        let entry = entries
            .get(key)
            .filter(|e| e.live())
            .ok_or_else(|| StoreError::not_found(key))?;
        Ok(Fetched {
            value: entry.value.clone(),
            cas: entry.cas,
        })
    }

    async fn get_multi(&self, keys: &[String]) -> Result<MultiFetch, StoreError> {
        let entries = self.entries.lock().expect("store mutex poisoned");
        let mut result = MultiFetch::default();
        for key in keys {
            match entries.get(key).filter(|e| e.live()) {
                Some(entry) => result.hits.push((
                    key.clone(),
                    Fetched {
                        value: entry.value.clone(),
                        cas: entry.cas,
                    },
                )),
                None => result.misses.push(key.clone()),
            }
        }
        Ok(result)
    }

    async fn insert(
        &self,
        key: &str,
        value: Value,
        opts: WriteOptions,
    ) -> Result<Cas, StoreError> {
        self.write(key, value, WriteOptions { cas: None, ..opts }, Some(false))
    }

    async fn replace(
        &self,
        key: &str,
        value: Value,
        opts: WriteOptions,
    ) -> Result<Cas, StoreError> {
        self.write(key, value, opts, Some(true))
    }

    async fn upsert(
        &self,
        key: &str,
        value: Value,
        opts: WriteOptions,
    ) -> Result<Cas, StoreError> {
        self.write(key, value, opts, None)
    }

    async fn remove(&self, key: &str, cas: Option<Cas>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let entry = entries
            .get(key)
            .filter(|e| e.live())
            .ok_or_else(|| StoreError::not_found(key))?;

        if let Some(lock_cas) = entry.lock_cas() {
            if cas != Some(lock_cas) {
                return Err(StoreError::temporary(format!("document locked: {key}")));
            }
        } else if let Some(cas) = cas {
            if cas != entry.cas {
                return Err(StoreError::cas_mismatch(key));
            }
        }

        entries.remove(key);
        debug!(key, "memory store remove");
        Ok(())
    }

    async fn counter(
        &self,
        key: &str,
        delta: i64,
        initial: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let current = entries.get(key).filter(|e| e.live()).map(|e| {
            e.value
                .as_i64()
                .ok_or_else(|| StoreError::fatal(format!("non-numeric counter: {key}")))
        });

        let next = match current {
            Some(current) => current?.saturating_add(delta),
            None => initial.ok_or_else(|| StoreError::not_found(key))?,
        };

        let cas = self.next_cas();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::from(next),
                cas,
                expires: None,
                lock: None,
            },
        );
        Ok(next)
    }

    async fn get_and_lock(&self, key: &str, ttl: Duration) -> Result<Fetched, StoreError> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let entry = entries
            .get_mut(key)
            .filter(|e| e.live())
            .ok_or_else(|| StoreError::not_found(key))?;

        if entry.lock_cas().is_some() {
            return Err(StoreError::temporary(format!("document locked: {key}")));
        }

        let cas = self.next_cas();
        entry.lock = Some(Lock {
            cas,
            until: Instant::now() + ttl,
        });
        Ok(Fetched {
            value: entry.value.clone(),
            cas,
        })
    }

    async fn unlock(&self, key: &str, cas: Cas) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let entry = entries
            .get_mut(key)
            .filter(|e| e.live())
            .ok_or_else(|| StoreError::not_found(key))?;

        match entry.lock_cas() {
            Some(lock_cas) if lock_cas == cas => {
                entry.lock = None;
                Ok(())
            }
            Some(_) => Err(StoreError::cas_mismatch(key)),
            None => Ok(()),
        }
    }
}
