//! Document Engine - Save, Remove, Find, Populate
//!
//! Orchestrates the full lifecycle of documents over the store: hook
//! chains, depth-first embedded-document expansion, primary upserts and
//! deletes, lookup-document maintenance, and multi-id retrieval with
//! population.
//!
//! Ordering within one save: pre-hooks, embedded children (depth-first,
//! left-to-right), own upsert, lookup updates, post-hooks, `save` event.
//! A failing child aborts the outer save; children already saved are not
//! rolled back.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::db::{with_temp_retry, RetryPolicy, WriteOptions};
use crate::models::document::Document;
use crate::models::events::DocumentEvent;
use crate::models::field::{FieldDescriptor, FieldKind};
use crate::models::keys;
use crate::models::value::{project_date, FieldValue};
use crate::services::error::OdmError;
use crate::services::index_service;
use crate::services::model_registry::Model;

/// Options for [`Document::save`]
#[derive(Clone, Copy, Default)]
pub struct SaveOptions {
    /// Include virtuals in the persisted body
    pub virtuals: bool,

    /// Override the schema's minimize setting for this save
    pub minimize: Option<bool>,

    /// Time-to-live for the stored document
    pub expiry: Option<Duration>,

    /// Durability: replicas the write must persist to
    pub persist_to: Option<u8>,

    /// Durability: replicas the write must replicate to
    pub replicate_to: Option<u8>,

    /// Override the connection-wide `wait_for_index`
    pub wait_for_index: Option<bool>,
}

/// Options for [`Document::remove`]
#[derive(Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Also remove embedded documents, depth-first
    pub remove_refs: bool,

    /// Raw delete: no hooks, no embedded recursion, no index purge
    pub lean: bool,
}

/// Which embedded references a find should hydrate
#[derive(Clone, Default, Debug)]
pub enum Populate {
    /// Leave references as bare keys
    #[default]
    None,

    /// Hydrate every reference field
    All,

    /// Hydrate one field, or one array element via `"field.N"`
    Path(String),

    /// Hydrate each listed path
    Paths(Vec<String>),
}

/// Options for the find family
#[derive(Clone, Default)]
pub struct FindOptions {
    pub populate: Populate,

    /// Report missed ids; falls back to the connection config
    pub missing: Option<bool>,

    /// Force the array result shape; falls back to the connection config
    pub always_return_arrays: Option<bool>,

    /// Return documents in input order; falls back to the connection
    /// config
    pub keep_sort_order: Option<bool>,
}

/// Input ids for [`Model::find`]
#[derive(Clone, Debug)]
pub enum FindIds {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for FindIds {
    fn from(id: &str) -> Self {
        Self::One(id.to_string())
    }
}

impl From<String> for FindIds {
    fn from(id: String) -> Self {
        Self::One(id)
    }
}

impl From<Vec<String>> for FindIds {
    fn from(ids: Vec<String>) -> Self {
        Self::Many(ids)
    }
}

impl From<&[&str]> for FindIds {
    fn from(ids: &[&str]) -> Self {
        Self::Many(ids.iter().map(|s| s.to_string()).collect())
    }
}

/// Result shape of [`Model::find`]
///
/// Mirrors the input shape: one id yields `One`, many ids (or
/// `always_return_arrays`) yield `Many` with the missed ids when
/// requested.
#[derive(Debug)]
pub enum FindResult {
    One(Option<Document>),
    Many {
        documents: Vec<Document>,
        misses: Option<Vec<String>>,
    },
}

impl FindResult {
    /// Collapse to the contained documents, discarding miss information
    pub fn into_documents(self) -> Vec<Document> {
        match self {
            Self::One(doc) => doc.into_iter().collect(),
            Self::Many { documents, .. } => documents,
        }
    }
}

type TreeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), OdmError>> + Send + 'a>>;

impl Document {
    /// Persist this document and its hydrated embedded children
    ///
    /// Children save first, depth-first and left-to-right; the first
    /// error aborts the remainder without rolling back children already
    /// saved. A save from a known CAS is optimistic: a conflicting
    /// concurrent write fails with [`OdmError::ConcurrentModification`]
    /// and leaves the stored document unchanged.
    pub async fn save(&mut self, opts: &SaveOptions) -> Result<(), OdmError> {
        let mut stack = Vec::new();
        self.save_tree(opts, &mut stack).await
    }

    fn save_tree<'a>(&'a mut self, opts: &'a SaveOptions, stack: &'a mut Vec<usize>) -> TreeFuture<'a> {
        Box::pin(async move {
            stack.push(self as *const Document as usize);
            let result = self.save_inner(opts, stack).await;
            stack.pop();
            result
        })
    }

    async fn save_inner(&mut self, opts: &SaveOptions, stack: &mut Vec<usize>) -> Result<(), OdmError> {
        self.run_pre("save").await?;
        self.save_children(opts, stack).await?;

        if self.key_value().is_none() {
            return Err(OdmError::MissingKey {
                model: self.model_name().to_string(),
            });
        }
        let key = self.storage_key()?;
        let minimize = opts
            .minimize
            .unwrap_or(self.schema().resolved().minimize);
        let body = self.stored_body(opts.virtuals, minimize)?;

        let store = self.store().clone();
        let write_opts = WriteOptions {
            cas: self.cas(),
            expiry: opts.expiry,
            persist_to: opts.persist_to,
            replicate_to: opts.replicate_to,
        };
        let policy = RetryPolicy::temporary(self.config());

        debug!(model = self.model_name(), %key, "saving document");
        let cas = with_temp_retry(policy, "save", || store.upsert(&key, body.clone(), write_opts))
            .await
            .map_err(|err| OdmError::from_store_on(&key, err))?;
        self.mark_persisted(cas);

        let failures = index_service::update_lookups(self).await;
        self.set_shadow(self.indexed_value_set());

        let wait = opts
            .wait_for_index
            .unwrap_or(self.config().wait_for_index);
        if !failures.is_empty() {
            if wait {
                return Err(OdmError::IndexFailed(failures));
            }
            let emit_errors = self.config().emit_errors;
            for failure in &failures {
                let message = failure.to_string();
                self.emit(&DocumentEvent::Indexed {
                    error: Some(message.clone()),
                });
                if emit_errors {
                    self.emit(&DocumentEvent::Errored { message });
                }
            }
        } else {
            self.emit(&DocumentEvent::Indexed { error: None });
        }

        self.run_post("save").await;
        self.emit(&DocumentEvent::Saved { key });
        Ok(())
    }

    async fn save_children(
        &mut self,
        opts: &SaveOptions,
        stack: &mut Vec<usize>,
    ) -> Result<(), OdmError> {
        let field_names: Vec<String> = self
            .schema()
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .collect();

        for name in field_names {
            match self.slot_mut(&name) {
                Some(FieldValue::Doc(child)) => {
                    let addr = child.as_ref() as *const Document as usize;
                    if stack.contains(&addr) {
                        let model = child.model_name().to_string();
                        return Err(OdmError::cyclic_embedding(model, name));
                    }
                    child.save_tree(opts, stack).await?;
                }
                Some(FieldValue::Array(items)) => {
                    for item in items.iter_mut() {
                        if let FieldValue::Doc(child) = item {
                            let addr = child.as_ref() as *const Document as usize;
                            if stack.contains(&addr) {
                                let model = child.model_name().to_string();
                                return Err(OdmError::cyclic_embedding(model, name));
                            }
                            child.save_tree(opts, stack).await?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Delete this document from the store
    ///
    /// With `remove_refs`, embedded documents (hydrated or held as bare
    /// keys) are removed first, each reachable document exactly once.
    /// With `lean`, this is a raw delete: no hooks, no recursion, no
    /// index purge, and a missing document counts as success.
    pub async fn remove(&mut self, opts: &RemoveOptions) -> Result<(), OdmError> {
        if opts.lean {
            let key = self.storage_key()?;
            let store = self.store().clone();
            let policy = RetryPolicy::temporary(self.config());
            match with_temp_retry(policy, "remove", || store.remove(&key, None)).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
            self.mark_removed();
            return Ok(());
        }

        let mut visited = HashSet::new();
        self.remove_tree(opts, &mut visited).await
    }

    fn remove_tree<'a>(
        &'a mut self,
        opts: &'a RemoveOptions,
        visited: &'a mut HashSet<String>,
    ) -> TreeFuture<'a> {
        Box::pin(async move {
            let key = self.storage_key()?;
            if !visited.insert(key.clone()) {
                return Ok(());
            }

            self.run_pre("remove").await?;

            if opts.remove_refs {
                self.remove_children(opts, visited).await?;
            }

            let store = self.store().clone();
            let policy = RetryPolicy::temporary(self.config());
            let cas = self.cas();
            debug!(model = self.model_name(), %key, "removing document");
            with_temp_retry(policy, "remove", || store.remove(&key, cas))
                .await
                .map_err(|err| OdmError::from_store_on(&key, err))?;

            let failures = index_service::purge_lookups(self).await;
            self.set_shadow(Default::default());
            if !failures.is_empty() {
                let emit_errors = self.config().emit_errors;
                for failure in &failures {
                    let message = failure.to_string();
                    self.emit(&DocumentEvent::Indexed {
                        error: Some(message.clone()),
                    });
                    if emit_errors {
                        self.emit(&DocumentEvent::Errored { message });
                    }
                }
            }

            self.mark_removed();
            self.run_post("remove").await;
            self.emit(&DocumentEvent::Removed { key });
            Ok(())
        })
    }

    async fn remove_children(
        &mut self,
        opts: &RemoveOptions,
        visited: &mut HashSet<String>,
    ) -> Result<(), OdmError> {
        let fields: Vec<(String, Option<String>)> = self
            .schema()
            .fields()
            .iter()
            .filter_map(|f| match &f.kind {
                FieldKind::Reference { model } => Some((f.name.clone(), Some(model.clone()))),
                FieldKind::Array { element, .. } => match &element.kind {
                    FieldKind::Reference { model } => Some((f.name.clone(), Some(model.clone()))),
                    _ => None,
                },
                _ => None,
            })
            .collect();

        for (name, model) in fields {
            // Hydrated children first; bare keys are loaded then removed.
            let mut scalar_keys = Vec::new();
            match self.slot_mut(&name) {
                Some(FieldValue::Doc(child)) => {
                    child.remove_tree(opts, visited).await?;
                }
                Some(FieldValue::Array(items)) => {
                    for item in items.iter_mut() {
                        match item {
                            FieldValue::Doc(child) => {
                                child.remove_tree(opts, visited).await?;
                            }
                            FieldValue::Value(scalar) => scalar_keys.push(scalar.clone()),
                            _ => {}
                        }
                    }
                }
                Some(FieldValue::Value(scalar)) => scalar_keys.push(scalar.clone()),
                _ => {}
            }

            if scalar_keys.is_empty() {
                continue;
            }
            let Some(model) = &model else { continue };
            let Some(target) = self.context().resolve_model(model) else {
                warn!(model = %model, field = %name, "cannot resolve embedded model for remove");
                continue;
            };
            let refs_expanded = self.schema().resolved().store_full_reference_id;
            for scalar in scalar_keys {
                let Some(key_field) = target.schema().key_field() else {
                    continue;
                };
                let scalar = if refs_expanded {
                    match &scalar {
                        Value::String(s) => {
                            Value::String(keys::user_key(s, key_field, target.schema()))
                        }
                        other => other.clone(),
                    }
                } else {
                    scalar
                };
                let storage = keys::storage_key(&scalar, key_field, target.schema())?;
                if visited.contains(&storage) {
                    continue;
                }
                let fetched = match self.store().get(&storage).await {
                    Ok(fetched) => fetched,
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err.into()),
                };
                let mut child = Document::hydrate(target.clone(), &fetched.value, fetched.cas);
                child.remove_tree(opts, visited).await?;
            }
        }
        Ok(())
    }

    /// Re-assert the lookup entries for this document's current indexed
    /// values
    ///
    /// Recreates entries deleted out of band; a normal save maintains
    /// them implicitly. Failures are returned aggregated and also emitted
    /// as `index` events.
    pub async fn index(&mut self) -> Result<(), OdmError> {
        let failures = index_service::ensure_lookups(self).await;
        self.set_shadow(self.indexed_value_set());
        if failures.is_empty() {
            self.emit(&DocumentEvent::Indexed { error: None });
            return Ok(());
        }
        for failure in &failures {
            self.emit(&DocumentEvent::Indexed {
                error: Some(failure.to_string()),
            });
        }
        Err(OdmError::IndexFailed(failures))
    }

    /// Run the pre- and post-chains of a custom hook event
    pub async fn run_hook(&mut self, event: &str) -> Result<(), OdmError> {
        self.run_pre(event).await?;
        self.run_post(event).await;
        Ok(())
    }

    async fn run_pre(&mut self, event: &str) -> Result<(), OdmError> {
        let chain = self.schema().hooks().pre_chain(event);
        for hook in chain {
            hook(self).await?;
        }
        Ok(())
    }

    async fn run_post(&self, event: &str) {
        let emit_errors = self.config().emit_errors;
        let chain = self.schema().hooks().post_chain(event);
        for hook in chain {
            if let Err(err) = hook(self).await {
                if emit_errors {
                    self.emit(&DocumentEvent::Errored {
                        message: err.to_string(),
                    });
                } else {
                    warn!(event, %err, "post-hook failed");
                }
            }
        }
    }

    /// Serialize for persistence: embedded documents collapse to their
    /// reference keys, the key field follows `store_full_key`
    fn stored_body(&self, virtuals: bool, minimize: bool) -> Result<Value, OdmError> {
        let schema = self.schema();
        let mut map = Map::new();

        for field in schema.fields() {
            if field.invisible || matches!(field.kind, FieldKind::Alias { .. }) {
                continue;
            }
            let Some(slot) = self.slot(&field.name) else {
                continue;
            };
            if field.is_key() {
                let Some(user) = self.key_value() else {
                    continue;
                };
                let stored = if schema.resolved().store_full_key {
                    Value::String(self.storage_key()?)
                } else {
                    user
                };
                map.insert(field.name.clone(), stored);
                continue;
            }
            if let Some(value) = self.stored_slot(field, slot)? {
                map.insert(field.name.clone(), value);
            }
        }

        if virtuals {
            for name in schema.virtual_names() {
                if let Some(virtual_def) = schema.virtual_def(name) {
                    map.insert(name.to_string(), (virtual_def.get)(self));
                }
            }
        }

        let mut body = Value::Object(map);
        if minimize {
            crate::models::document::minimize_value(&mut body);
        }
        Ok(body)
    }

    fn stored_slot(
        &self,
        field: &FieldDescriptor,
        slot: &FieldValue,
    ) -> Result<Option<Value>, OdmError> {
        let element_kind = match &field.kind {
            FieldKind::Array { element, .. } => Some(&element.kind),
            _ => None,
        };
        match slot {
            FieldValue::Missing => Ok(None),
            FieldValue::Date(d) => Ok(Some(project_date(d, false))),
            FieldValue::Doc(child) => self.stored_reference_for_doc(child).map(Some),
            FieldValue::Value(scalar) => match &field.kind {
                FieldKind::Reference { model } => {
                    self.stored_reference_for_scalar(model, scalar).map(Some)
                }
                _ => Ok(Some(scalar.clone())),
            },
            FieldValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let value = match item {
                        FieldValue::Missing => continue,
                        FieldValue::Date(d) => Some(project_date(d, false)),
                        FieldValue::Doc(child) => Some(self.stored_reference_for_doc(child)?),
                        FieldValue::Value(scalar) => match element_kind {
                            Some(FieldKind::Reference { model }) => {
                                Some(self.stored_reference_for_scalar(model, scalar)?)
                            }
                            _ => Some(scalar.clone()),
                        },
                        FieldValue::Array(_) => None,
                    };
                    if let Some(value) = value {
                        out.push(value);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
        }
    }

    fn stored_reference_for_doc(&self, child: &Document) -> Result<Value, OdmError> {
        if self.schema().resolved().store_full_reference_id {
            Ok(Value::String(child.storage_key()?))
        } else {
            child.key_value().ok_or_else(|| OdmError::MissingKey {
                model: child.model_name().to_string(),
            })
        }
    }

    fn stored_reference_for_scalar(&self, model: &str, scalar: &Value) -> Result<Value, OdmError> {
        if !self.schema().resolved().store_full_reference_id {
            return Ok(scalar.clone());
        }
        let Some(target) = self.context().resolve_model(model) else {
            return Ok(scalar.clone());
        };
        let Some(key_field) = target.schema().key_field() else {
            return Ok(scalar.clone());
        };
        Ok(Value::String(keys::storage_key(
            scalar,
            key_field,
            target.schema(),
        )?))
    }
}

impl Model {
    /// Fetch by id(s) in one `get_multi`, shaped like the input
    pub async fn find(&self, ids: impl Into<FindIds>, opts: &FindOptions) -> Result<FindResult, OdmError> {
        let force_array = opts
            .always_return_arrays
            .unwrap_or(self.ctx.config.always_return_arrays);
        match ids.into() {
            FindIds::One(id) if !force_array => {
                Ok(FindResult::One(self.find_by_id(&id, opts).await?))
            }
            FindIds::One(id) => {
                let (documents, misses) = self.find_many(&[id], opts).await?;
                Ok(FindResult::Many { documents, misses })
            }
            FindIds::Many(ids) => {
                let (documents, misses) = self.find_many(&ids, opts).await?;
                Ok(FindResult::Many { documents, misses })
            }
        }
    }

    /// Fetch a single document by its user-visible key value
    pub async fn find_by_id(&self, id: &str, opts: &FindOptions) -> Result<Option<Document>, OdmError> {
        let (documents, _) = self.find_many(&[id.to_string()], opts).await?;
        Ok(documents.into_iter().next())
    }

    /// Fetch many documents; returns `(documents, misses)`
    pub async fn find_by_ids(
        &self,
        ids: &[String],
        opts: &FindOptions,
    ) -> Result<(Vec<Document>, Option<Vec<String>>), OdmError> {
        self.find_many(ids, opts).await
    }

    async fn find_many(
        &self,
        ids: &[String],
        opts: &FindOptions,
    ) -> Result<(Vec<Document>, Option<Vec<String>>), OdmError> {
        let schema = self.ctx.schema();
        let key_field = schema.key_field().ok_or_else(|| OdmError::MissingKey {
            model: self.name().to_string(),
        })?;

        let mut storage_keys = Vec::with_capacity(ids.len());
        for id in ids {
            storage_keys.push(keys::storage_key(&Value::String(id.clone()), key_field, schema)?);
        }

        let store = self.ctx.store.clone();
        let policy = RetryPolicy::temporary(&self.ctx.config);
        let fetch = with_temp_retry(policy, "find", || store.get_multi(&storage_keys)).await?;

        let mut documents: Vec<Document> = fetch
            .hits
            .iter()
            .map(|(_, hit)| Document::hydrate(self.ctx.clone(), &hit.value, hit.cas))
            .collect();

        if opts
            .keep_sort_order
            .unwrap_or(self.ctx.config.keep_sort_order)
        {
            let order: Vec<&String> = ids.iter().collect();
            documents.sort_by_key(|doc| {
                let key = match doc.key_value() {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                order.iter().position(|id| **id == key).unwrap_or(usize::MAX)
            });
        }

        if !matches!(opts.populate, Populate::None) {
            self.populate_documents(&mut documents, &opts.populate).await?;
        }

        let misses = if opts.missing.unwrap_or(self.ctx.config.missing) {
            // Map missed storage keys back to the requested ids.
            let missed: Vec<String> = ids
                .iter()
                .zip(&storage_keys)
                .filter(|(_, storage)| fetch.misses.contains(storage))
                .map(|(id, _)| id.clone())
                .collect();
            Some(missed)
        } else {
            None
        };

        Ok((documents, misses))
    }

    /// Remove documents by id
    ///
    /// Non-lean removals load each document first so hooks and index
    /// purging run; `lean` issues raw deletes and treats missing
    /// documents as success.
    pub async fn remove_by_id(&self, ids: &[String], opts: &RemoveOptions) -> Result<(), OdmError> {
        if opts.lean {
            let schema = self.ctx.schema();
            let key_field = schema.key_field().ok_or_else(|| OdmError::MissingKey {
                model: self.name().to_string(),
            })?;
            for id in ids {
                let key = keys::storage_key(&Value::String(id.clone()), key_field, schema)?;
                match self.ctx.store.remove(&key, None).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
            }
            return Ok(());
        }

        let (documents, _) = self.find_many(ids, &FindOptions::default()).await?;
        for mut doc in documents {
            doc.remove(opts).await?;
        }
        Ok(())
    }

    async fn populate_documents(
        &self,
        documents: &mut [Document],
        populate: &Populate,
    ) -> Result<(), OdmError> {
        // (document index, field, array element) slots wanting hydration,
        // grouped per target model for batched fetches.
        #[derive(Debug)]
        struct Request {
            doc: usize,
            field: String,
            element: Option<usize>,
            id: Value,
        }

        let schema = self.ctx.schema();
        let mut by_model: std::collections::HashMap<String, Vec<Request>> =
            std::collections::HashMap::new();

        let paths: Option<Vec<(String, Option<usize>)>> = match populate {
            Populate::None => return Ok(()),
            Populate::All => None,
            Populate::Path(path) => Some(vec![parse_populate_path(path)]),
            Populate::Paths(paths) => Some(paths.iter().map(|p| parse_populate_path(p)).collect()),
        };

        for (doc_idx, doc) in documents.iter().enumerate() {
            for field in schema.fields() {
                let wanted_element = match &paths {
                    None => None,
                    Some(paths) => {
                        let Some((_, element)) = paths.iter().find(|(name, _)| name == &field.name)
                        else {
                            continue;
                        };
                        *element
                    }
                };

                let model = match &field.kind {
                    FieldKind::Reference { model } => model.clone(),
                    FieldKind::Array { element, .. } => match &element.kind {
                        FieldKind::Reference { model } => model.clone(),
                        _ => continue,
                    },
                    _ => continue,
                };

                match doc.slot(&field.name) {
                    Some(FieldValue::Value(scalar)) => {
                        by_model.entry(model).or_default().push(Request {
                            doc: doc_idx,
                            field: field.name.clone(),
                            element: None,
                            id: scalar.clone(),
                        });
                    }
                    Some(FieldValue::Array(items)) => {
                        for (i, item) in items.iter().enumerate() {
                            if let Some(only) = wanted_element {
                                if i != only {
                                    continue;
                                }
                            }
                            if let FieldValue::Value(scalar) = item {
                                by_model.entry(model.clone()).or_default().push(Request {
                                    doc: doc_idx,
                                    field: field.name.clone(),
                                    element: Some(i),
                                    id: scalar.clone(),
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        // Whether this model persisted its references fully expanded.
        let refs_expanded = self.ctx.schema().resolved().store_full_reference_id;

        for (model_name, requests) in by_model {
            let Some(target) = self.ctx.resolve_model(&model_name) else {
                return Err(OdmError::model_not_found(model_name));
            };
            let target_schema = target.schema();
            let key_field = target_schema.key_field().ok_or_else(|| OdmError::MissingKey {
                model: model_name.clone(),
            })?;

            let mut storage_keys = Vec::with_capacity(requests.len());
            for request in &requests {
                let id = if refs_expanded {
                    match &request.id {
                        Value::String(s) => {
                            Value::String(keys::user_key(s, key_field, target_schema))
                        }
                        other => other.clone(),
                    }
                } else {
                    request.id.clone()
                };
                storage_keys.push(keys::storage_key(&id, key_field, target_schema)?);
            }

            let store = self.ctx.store.clone();
            let policy = RetryPolicy::temporary(&self.ctx.config);
            let keys_for_fetch = storage_keys.clone();
            let fetch =
                with_temp_retry(policy, "populate", || store.get_multi(&keys_for_fetch)).await?;

            for (request, storage_key) in requests.iter().zip(&storage_keys) {
                let Some(hit) = fetch.hit(storage_key) else {
                    continue;
                };
                let child = Document::hydrate(target.clone(), &hit.value, hit.cas);
                let doc = &mut documents[request.doc];
                match request.element {
                    None => doc.put_slot(&request.field, FieldValue::Doc(Box::new(child))),
                    Some(i) => {
                        if let Some(FieldValue::Array(items)) = doc.slot_mut(&request.field) {
                            if let Some(slot) = items.get_mut(i) {
                                *slot = FieldValue::Doc(Box::new(child));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Split `"field.N"` into the field name and the optional element index
fn parse_populate_path(path: &str) -> (String, Option<usize>) {
    match path.rsplit_once('.') {
        Some((field, index)) => match index.parse::<usize>() {
            Ok(i) => (field.to_string(), Some(i)),
            Err(_) => (path.to_string(), None),
        },
        None => (path.to_string(), None),
    }
}
