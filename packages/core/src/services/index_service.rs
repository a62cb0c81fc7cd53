//! Lookup-Document Maintenance
//!
//! Keeps the secondary "lookup" documents consistent with the indexed
//! fields of every saved document. A lookup document is a tiny record
//! `{"key": <primary reference>}` stored at a key derived from the index
//! name and the field value; `find_by` resolves through it.
//!
//! For each save the maintainer diffs the document's current indexed
//! values against the shadow snapshot taken at the last load/save:
//! vanished values have their lookup deleted (only when still owned by
//! this document), new values are upserted last-write-wins. Every lookup
//! mutation runs a bounded CAS loop, optionally serialized with
//! `get_and_lock`.
//!
//! Failures here are collected, not thrown; the document engine decides
//! whether they fail the save (`wait_for_index`) or surface as `index`
//! events.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::{RetryPolicy, Store, StoreError, WriteOptions};
use crate::models::document::Document;
use crate::models::keys;
use crate::services::error::OdmError;
use crate::services::document_service::FindOptions;
use crate::services::model_registry::Model;

/// How long a lookup document stays locked while one indexer rewrites it
const LOOKUP_LOCK_TTL: Duration = Duration::from_secs(5);

/// One pending lookup mutation
#[derive(Debug)]
enum LookupOp {
    Add { ref_key: String },
    Remove { ref_key: String },
}

/// The value a lookup document points back at for `doc`
///
/// Full storage key or user-visible key value, per
/// `store_full_reference_id`.
pub(crate) fn reference_payload(doc: &Document) -> Result<String, OdmError> {
    let schema = doc.schema();
    if schema.resolved().store_full_reference_id {
        Ok(doc.storage_key()?)
    } else {
        let value = doc.key_value().ok_or_else(|| OdmError::MissingKey {
            model: doc.model_name().to_string(),
        })?;
        Ok(keys::stringify(&value, &schema.resolved().delimiter)?)
    }
}

fn plan_ops(
    doc: &Document,
    next: &std::collections::HashMap<String, BTreeSet<String>>,
) -> Vec<Result<LookupOp, OdmError>> {
    let schema = doc.schema();
    let empty = BTreeSet::new();
    let mut ops = Vec::new();

    for field in schema.indexed_fields() {
        let Some(index_name) = field.index_name.as_deref() else {
            continue;
        };
        let old = doc.shadow().get(&field.name).unwrap_or(&empty);
        let new = next.get(&field.name).unwrap_or(&empty);

        for value in old.difference(new) {
            ops.push(
                keys::ref_key(index_name, &Value::String(value.clone()), schema)
                    .map(|ref_key| LookupOp::Remove { ref_key })
                    .map_err(OdmError::from),
            );
        }
        for value in new.difference(old) {
            ops.push(
                keys::ref_key(index_name, &Value::String(value.clone()), schema)
                    .map(|ref_key| LookupOp::Add { ref_key })
                    .map_err(OdmError::from),
            );
        }
    }
    ops
}

/// Bring lookup documents in line with the document's current indexed
/// values; returns the failures (empty on full success)
///
/// The caller refreshes the document's shadow snapshot afterwards.
pub(crate) async fn update_lookups(doc: &Document) -> Vec<OdmError> {
    let next = doc.indexed_value_set();
    apply(doc, plan_ops(doc, &next)).await
}

/// Re-assert a lookup entry for every current indexed value
///
/// Unlike [`update_lookups`] this ignores the shadow snapshot, so entries
/// deleted out of band are recreated. Nothing is removed.
pub(crate) async fn ensure_lookups(doc: &Document) -> Vec<OdmError> {
    let schema = doc.schema();
    let current = doc.indexed_value_set();
    let mut ops = Vec::new();
    for field in schema.indexed_fields() {
        let Some(index_name) = field.index_name.as_deref() else {
            continue;
        };
        let Some(values) = current.get(&field.name) else {
            continue;
        };
        for value in values {
            ops.push(
                keys::ref_key(index_name, &Value::String(value.clone()), schema)
                    .map(|ref_key| LookupOp::Add { ref_key })
                    .map_err(OdmError::from),
            );
        }
    }
    apply(doc, ops).await
}

/// Delete every lookup entry owned by the document (remove path)
pub(crate) async fn purge_lookups(doc: &Document) -> Vec<OdmError> {
    let next = doc
        .schema()
        .indexed_fields()
        .map(|f| (f.name.clone(), BTreeSet::new()))
        .collect();
    apply(doc, plan_ops(doc, &next)).await
}

async fn apply(doc: &Document, ops: Vec<Result<LookupOp, OdmError>>) -> Vec<OdmError> {
    if ops.is_empty() {
        return Vec::new();
    }

    let owner = match reference_payload(doc) {
        Ok(owner) => owner,
        Err(err) => return vec![err],
    };
    let store = doc.store().clone();
    let config = doc.config();
    let policy = RetryPolicy::atomic(config);
    let use_lock = config.atomic_lock;

    let mut failures = Vec::new();
    for op in ops {
        let result = match op {
            Err(err) => Err(err),
            Ok(LookupOp::Add { ref_key }) => {
                debug!(%owner, %ref_key, "adding lookup entry");
                add_entry(store.as_ref(), policy, use_lock, &ref_key, &owner).await
            }
            Ok(LookupOp::Remove { ref_key }) => {
                debug!(%owner, %ref_key, "removing lookup entry");
                remove_entry(store.as_ref(), policy, use_lock, &ref_key, &owner).await
            }
        };
        if let Err(err) = result {
            warn!(%err, "lookup maintenance failed");
            failures.push(err);
        }
    }
    failures
}

/// Upsert `{key: owner}` at `ref_key`, last write wins
async fn add_entry(
    store: &dyn Store,
    policy: RetryPolicy,
    use_lock: bool,
    ref_key: &str,
    owner: &str,
) -> Result<(), OdmError> {
    let payload = json!({ "key": owner });
    let mut attempt = 0u32;
    loop {
        let outcome: Result<(), StoreError> = if use_lock {
            match store.get_and_lock(ref_key, LOOKUP_LOCK_TTL).await {
                Ok(fetched) => {
                    if fetched.value.get("key").and_then(Value::as_str) == Some(owner) {
                        let _ = store.unlock(ref_key, fetched.cas).await;
                        Ok(())
                    } else {
                        store
                            .replace(ref_key, payload.clone(), WriteOptions::with_cas(Some(fetched.cas)))
                            .await
                            .map(|_| ())
                    }
                }
                Err(err) if err.is_not_found() => store
                    .insert(ref_key, payload.clone(), WriteOptions::default())
                    .await
                    .map(|_| ()),
                Err(err) => Err(err),
            }
        } else {
            store
                .upsert(ref_key, payload.clone(), WriteOptions::default())
                .await
                .map(|_| ())
        };

        match outcome {
            Ok(()) => return Ok(()),
            Err(err) if retryable(&err) && attempt < policy.times => {
                attempt += 1;
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(err) => return Err(OdmError::from_store_on(ref_key, err)),
        }
    }
}

/// Delete the lookup at `ref_key` iff it still references `owner`
async fn remove_entry(
    store: &dyn Store,
    policy: RetryPolicy,
    use_lock: bool,
    ref_key: &str,
    owner: &str,
) -> Result<(), OdmError> {
    let mut attempt = 0u32;
    loop {
        let outcome: Result<(), StoreError> = if use_lock {
            match store.get_and_lock(ref_key, LOOKUP_LOCK_TTL).await {
                Ok(fetched) => {
                    if fetched.value.get("key").and_then(Value::as_str) == Some(owner) {
                        store.remove(ref_key, Some(fetched.cas)).await
                    } else {
                        // Another document owns this value now.
                        let _ = store.unlock(ref_key, fetched.cas).await;
                        Ok(())
                    }
                }
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            match store.get(ref_key).await {
                Ok(fetched) => {
                    if fetched.value.get("key").and_then(Value::as_str) == Some(owner) {
                        store.remove(ref_key, Some(fetched.cas)).await
                    } else {
                        Ok(())
                    }
                }
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err),
            }
        };

        match outcome {
            Ok(()) => return Ok(()),
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) if retryable(&err) && attempt < policy.times => {
                attempt += 1;
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(err) => return Err(OdmError::from_store_on(ref_key, err)),
        }
    }
}

fn retryable(err: &StoreError) -> bool {
    err.is_temporary() || err.is_cas_mismatch()
}

impl Model {
    /// Resolve a document through the lookup entry for one indexed field
    /// value
    ///
    /// A missing lookup document resolves to `None`. A lookup document
    /// pointing at a vanished primary resolves to `None` as well, unless
    /// `error_on_missing_index` asks for a [`OdmError::DanglingIndex`].
    pub async fn find_by(
        &self,
        field: &str,
        value: &Value,
        opts: &FindOptions,
    ) -> Result<Option<Document>, OdmError> {
        let schema = self.ctx.schema();
        let descriptor = schema
            .resolve_field(field)
            .filter(|f| f.index)
            .ok_or_else(|| OdmError::UnknownIndex {
                model: self.name().to_string(),
                field: field.to_string(),
            })?;
        let index_name = descriptor
            .index_name
            .clone()
            .unwrap_or_else(|| keys::derive_index_name(&descriptor.name));

        let ref_key = keys::ref_key(&index_name, value, schema)?;
        let fetched = match self.ctx.store.get(&ref_key).await {
            Ok(fetched) => fetched,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let Some(target) = fetched.value.get("key").and_then(Value::as_str) else {
            warn!(%ref_key, "malformed lookup document");
            return Ok(None);
        };

        let id = if schema.resolved().store_full_reference_id {
            let key_field = schema.key_field().ok_or_else(|| OdmError::MissingKey {
                model: self.name().to_string(),
            })?;
            keys::user_key(target, key_field, schema)
        } else {
            target.to_string()
        };

        match self.find_by_id(&id, opts).await? {
            Some(doc) => Ok(Some(doc)),
            None if self.ctx.config.error_on_missing_index => {
                Err(OdmError::dangling_index(ref_key, target))
            }
            None => Ok(None),
        }
    }
}
