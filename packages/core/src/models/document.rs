//! Document Instance
//!
//! A [`Document`] is a mutable, schema-validated property bag bound to a
//! compiled model. It owns the accumulated write errors, the CAS token
//! from the last store round-trip, the shadow snapshot of indexed values
//! used for lookup-document deltas, and the per-instance event listeners.
//!
//! Field writes run the ordered pipeline: transform, typecast, per-field
//! validator, schema write guard, commit, write observer. A rejected step
//! skips the commit and appends a [`SetError`]; nothing here throws.
//!
//! Persistence (save/remove/find) lives in the service layer; this module
//! is I/O free apart from holding the shared store handle for it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Cas, Store};
use crate::models::events::{DocumentEvent, EventKind, Listeners};
use crate::models::field::{FieldDescriptor, FieldKind};
use crate::models::keys::{self, KeyError};
use crate::models::schema::{ObjectTransformFn, Schema};
use crate::models::value::{project_date, typecast, FieldValue, SetError};

/// Resolves model names to their compiled contexts
///
/// Implemented by the ODM handle; documents hold a weak reference so
/// embedded fields can reach sibling models without global state.
pub trait ModelResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<ModelContext>>;
}

/// Everything a document needs from its model: compiled schema, store
/// handle, connection config, and the way back to sibling models
pub struct ModelContext {
    pub(crate) name: String,
    pub(crate) schema: Arc<Schema>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: Config,
    pub(crate) resolver: Weak<dyn ModelResolver>,
}

impl ModelContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn resolve_model(&self, name: &str) -> Option<Arc<ModelContext>> {
        self.resolver.upgrade()?.resolve(name)
    }
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContext")
            .field("name", &self.name)
            .finish()
    }
}

/// Options for [`Document::to_object`]
#[derive(Clone, Default)]
pub struct ToObjectOptions {
    /// Post-serialization mapper; falls back to the schema default
    pub transform: Option<ObjectTransformFn>,

    /// Drop empty objects and arrays; falls back to the schema setting
    pub minimize: Option<bool>,

    /// Include computed virtuals
    pub virtuals: bool,

    /// Serialize dates as ISO-8601 strings instead of epoch milliseconds
    pub date_to_iso: Option<bool>,
}

/// A schema-validated, store-bound record
#[derive(Clone)]
pub struct Document {
    ctx: Arc<ModelContext>,
    values: HashMap<String, FieldValue>,
    errors: Vec<SetError>,
    cas: Option<Cas>,
    is_new: bool,
    shadow: HashMap<String, BTreeSet<String>>,
    listeners: Listeners,
}

impl Document {
    /// Build a fresh document: defaults applied, key generated when the
    /// key field asks for it
    pub(crate) fn create(ctx: Arc<ModelContext>) -> Self {
        let mut doc = Self {
            ctx,
            values: HashMap::new(),
            errors: Vec::new(),
            cas: None,
            is_new: true,
            shadow: HashMap::new(),
            listeners: Listeners::default(),
        };
        doc.apply_defaults();
        doc.generate_key();
        doc
    }

    /// Rebuild a document from its persisted body
    ///
    /// Hydration bypasses transforms, validators, and write hooks so that
    /// whatever was persisted is always loadable; values that no longer
    /// typecast are kept raw.
    pub(crate) fn hydrate(ctx: Arc<ModelContext>, body: &Value, cas: Cas) -> Self {
        let schema = ctx.schema.clone();
        let mut doc = Self {
            ctx,
            values: HashMap::new(),
            errors: Vec::new(),
            cas: Some(cas),
            is_new: false,
            shadow: HashMap::new(),
            listeners: Listeners::default(),
        };

        if let Value::Object(map) = body {
            for field in schema.fields() {
                if matches!(field.kind, FieldKind::Alias { .. }) {
                    continue;
                }
                let Some(raw) = map.get(&field.name) else {
                    continue;
                };
                let raw = if field.is_key() && schema.resolved().store_full_key {
                    match raw {
                        Value::String(s) => Value::String(keys::user_key(s, field, &schema)),
                        other => other.clone(),
                    }
                } else {
                    raw.clone()
                };
                doc.hydrate_set(field, raw);
            }
        }

        doc.shadow = doc.indexed_value_set();
        doc
    }

    fn apply_defaults(&mut self) {
        let schema = self.ctx.schema.clone();
        for field in schema.fields() {
            let Some(default) = &field.default else {
                continue;
            };
            if self.values.get(&field.name).map_or(false, |v| !v.is_missing()) {
                continue;
            }
            let value = match default {
                crate::models::field::DefaultValue::Fixed(v) => v.clone(),
                crate::models::field::DefaultValue::Computed(f) => f(self),
            };
            self.hydrate_set(field, value);
        }
    }

    fn generate_key(&mut self) {
        let schema = self.ctx.schema.clone();
        let Some(field) = schema.key_field() else {
            return;
        };
        let generate = field.key.as_ref().map_or(false, |k| k.generate);
        let missing = self
            .values
            .get(&field.name)
            .map_or(true, FieldValue::is_missing);
        if generate && missing && matches!(field.kind, FieldKind::String(_)) {
            self.values.insert(
                field.name.clone(),
                FieldValue::Value(Value::String(Uuid::new_v4().to_string())),
            );
        }
    }

    fn hydrate_set(&mut self, field: &FieldDescriptor, raw: Value) {
        let slot = match typecast(&field.kind, raw.clone()) {
            Ok(slot) => slot,
            Err(_) => FieldValue::Value(raw),
        };
        if !slot.is_missing() {
            self.values.insert(field.name.clone(), slot);
        }
    }

    // ------------------------------------------------------------------
    // Field access
    // ------------------------------------------------------------------

    /// Write one field through the full validation pipeline
    ///
    /// Returns whether the write committed; on rejection the prior value
    /// is kept and the reason is appended to [`Document::errors`].
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        let schema = self.ctx.schema.clone();

        if schema.field(name).is_none() {
            if let Some(virtual_def) = schema.virtual_def(name) {
                return match &virtual_def.set {
                    Some(setter) => {
                        let setter = setter.clone();
                        setter(self, value);
                        true
                    }
                    None => {
                        self.push_error(name, "virtual has no setter", value);
                        false
                    }
                };
            }
        }

        let Some(field) = schema.resolve_field(name) else {
            self.push_error(name, "unknown field", value);
            return false;
        };
        self.write_checked(field, value)
    }

    /// Write several fields from a JSON object
    ///
    /// Returns the number of committed writes.
    pub fn set_many(&mut self, data: Value) -> usize {
        let Value::Object(map) = data else {
            self.push_error("", "set_many expects an object", data);
            return 0;
        };
        map.into_iter()
            .filter(|(name, value)| self.set(name, value.clone()))
            .count()
    }

    fn write_checked(&mut self, field: &FieldDescriptor, raw: Value) -> bool {
        if field.read_only {
            self.push_error(&field.name, "field is read-only", raw);
            return false;
        }

        let previous = self
            .values
            .get(&field.name)
            .map(|v| v.projected(false))
            .unwrap_or(Value::Null);

        let raw = match &field.transform {
            Some(transform) => transform(raw),
            None => raw,
        };

        let slot = match typecast(&field.kind, raw.clone()) {
            Ok(slot) => slot,
            Err(message) => {
                self.errors.push(SetError {
                    field: field.name.clone(),
                    message,
                    attempted: raw,
                    previous,
                });
                return false;
            }
        };

        let projected = slot.projected(false);

        if let Some(validator) = &field.validator {
            if !validator(&projected) {
                self.errors.push(SetError {
                    field: field.name.clone(),
                    message: "validator rejected value".to_string(),
                    attempted: raw,
                    previous,
                });
                return false;
            }
        }

        if let Some(guard) = self.ctx.schema.options().on_before_value_set.clone() {
            if !guard(self, &field.name, &projected) {
                self.errors.push(SetError {
                    field: field.name.clone(),
                    message: "write canceled by schema guard".to_string(),
                    attempted: raw,
                    previous,
                });
                return false;
            }
        }

        self.values.insert(field.name.clone(), slot);

        if let Some(observer) = self.ctx.schema.options().on_value_set.clone() {
            observer(self, &field.name, &projected);
        }
        true
    }

    /// Attach a hydrated embedded document to a reference field
    pub fn set_document(&mut self, name: &str, doc: Document) -> bool {
        let schema = self.ctx.schema.clone();
        let Some(field) = schema.resolve_field(name) else {
            self.push_error(name, "unknown field", Value::Null);
            return false;
        };
        match &field.kind {
            FieldKind::Reference { model } if doc.model_name() == model.as_str() => {
                self.values
                    .insert(field.name.clone(), FieldValue::Doc(Box::new(doc)));
                true
            }
            FieldKind::Reference { model } => {
                let message = format!(
                    "expected a {model} document, got {}",
                    doc.model_name()
                );
                self.push_error(&field.name.clone(), &message, Value::Null);
                false
            }
            _ => {
                self.push_error(&field.name.clone(), "field is not a reference", Value::Null);
                false
            }
        }
    }

    /// Append a hydrated embedded document to an array-of-reference field
    pub fn push_document(&mut self, name: &str, doc: Document) -> bool {
        let schema = self.ctx.schema.clone();
        let Some(field) = schema.resolve_field(name) else {
            self.push_error(name, "unknown field", Value::Null);
            return false;
        };
        let FieldKind::Array { element, .. } = &field.kind else {
            self.push_error(&field.name.clone(), "field is not an array", Value::Null);
            return false;
        };
        let FieldKind::Reference { model } = &element.kind else {
            self.push_error(
                &field.name.clone(),
                "array elements are not references",
                Value::Null,
            );
            return false;
        };
        if doc.model_name() != model.as_str() {
            let message = format!("expected a {model} document, got {}", doc.model_name());
            self.push_error(&field.name.clone(), &message, Value::Null);
            return false;
        }

        let slot = self
            .values
            .entry(field.name.clone())
            .or_insert_with(|| FieldValue::Array(Vec::new()));
        match slot {
            FieldValue::Array(items) => {
                items.push(FieldValue::Doc(Box::new(doc)));
                true
            }
            _ => {
                *slot = FieldValue::Array(vec![FieldValue::Doc(Box::new(doc))]);
                true
            }
        }
    }

    /// Read a field as plain JSON, applying alias and getter
    ///
    /// Dates project as epoch milliseconds; hydrated embedded documents
    /// project as their key value (use [`Document::get_document`] for the
    /// instance). Virtuals are readable by name.
    pub fn get(&self, name: &str) -> Option<Value> {
        let schema = &self.ctx.schema;

        if schema.field(name).is_none() {
            if let Some(virtual_def) = schema.virtual_def(name) {
                return Some((virtual_def.get)(self));
            }
        }

        let field = schema.resolve_field(name)?;
        let slot = self.values.get(&field.name)?;
        if slot.is_missing() {
            return None;
        }
        let value = slot.projected(false);
        Some(match &field.getter {
            Some(getter) => getter(value),
            None => value,
        })
    }

    /// Read several fields at once; unset fields are omitted
    pub fn get_many(&self, names: &[&str]) -> Map<String, Value> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|value| (name.to_string(), value)))
            .collect()
    }

    /// Typed accessor for date fields
    pub fn get_date(&self, name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let field = self.ctx.schema.resolve_field(name)?;
        match self.values.get(&field.name)? {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// The hydrated embedded document held by a reference field, if any
    pub fn get_document(&self, name: &str) -> Option<&Document> {
        let field = self.ctx.schema.resolve_field(name)?;
        match self.values.get(&field.name)? {
            FieldValue::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    /// Hydrated embedded documents held by an array-of-reference field
    pub fn get_documents(&self, name: &str) -> Vec<&Document> {
        let Some(field) = self.ctx.schema.resolve_field(name) else {
            return Vec::new();
        };
        match self.values.get(&field.name) {
            Some(FieldValue::Array(items)) => items
                .iter()
                .filter_map(|slot| match slot {
                    FieldValue::Doc(doc) => Some(doc.as_ref()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Invoke a schema-registered instance method by name
    pub fn call(&mut self, name: &str, args: Value) -> Option<Value> {
        let method = self.ctx.schema.method_fn(name).cloned()?;
        Some(method(self, args))
    }

    // ------------------------------------------------------------------
    // Errors, identity, lifecycle
    // ------------------------------------------------------------------

    fn push_error(&mut self, field: &str, message: &str, attempted: Value) {
        let previous = self
            .ctx
            .schema
            .resolve_field(field)
            .and_then(|f| self.values.get(&f.name))
            .map(|v| v.projected(false))
            .unwrap_or(Value::Null);
        self.errors.push(SetError {
            field: field.to_string(),
            message: message.to_string(),
            attempted,
            previous,
        });
    }

    /// Rejected writes accumulated since the last [`Document::clear_errors`]
    pub fn errors(&self) -> &[SetError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// The model this document belongs to
    pub fn model_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn schema(&self) -> &Schema {
        &self.ctx.schema
    }

    pub(crate) fn context(&self) -> &Arc<ModelContext> {
        &self.ctx
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    pub(crate) fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// CAS token from the last store round-trip, if any
    pub fn cas(&self) -> Option<Cas> {
        self.cas
    }

    /// Explicitly assign a CAS token, e.g. one obtained out of band
    ///
    /// The next save becomes optimistic against it; `None` returns the
    /// document to blind-upsert behavior.
    pub fn set_cas(&mut self, cas: Option<Cas>) {
        self.cas = cas;
    }

    /// Whether this document has never been persisted
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn mark_persisted(&mut self, cas: Cas) {
        self.cas = Some(cas);
        self.is_new = false;
    }

    pub(crate) fn mark_removed(&mut self) {
        self.cas = None;
        self.is_new = true;
    }

    /// The user-visible key value, if set
    pub fn key_value(&self) -> Option<Value> {
        let field = self.ctx.schema.key_field()?;
        let slot = self.values.get(&field.name)?;
        match slot {
            FieldValue::Missing => None,
            other => Some(other.projected(false)),
        }
    }

    /// The storage key this document persists under
    pub fn storage_key(&self) -> Result<String, KeyError> {
        let schema = &self.ctx.schema;
        let field = schema
            .key_field()
            .ok_or_else(|| KeyError::invalid("<none>", "schema has no key field"))?;
        let value = self
            .key_value()
            .ok_or_else(|| KeyError::invalid("<unset>", "document has no key value"))?;
        keys::storage_key(&value, field, schema)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register a listener for a lifecycle event on this instance
    pub fn on(&mut self, kind: EventKind, listener: impl Fn(&DocumentEvent) + Send + Sync + 'static) {
        self.listeners.on(kind, listener);
    }

    pub(crate) fn emit(&self, event: &DocumentEvent) {
        self.listeners.emit(event);
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Plain-object serialization
    ///
    /// Hydrated embedded documents expand to nested objects; bare
    /// reference keys stay scalars. Order: fields, then virtuals, then
    /// minimization, then the transform.
    pub fn to_object(&self, opts: &ToObjectOptions) -> Value {
        let schema = &self.ctx.schema;
        let minimize = opts.minimize.unwrap_or(schema.resolved().minimize);
        let date_to_iso = opts.date_to_iso.unwrap_or(false);

        let mut map = Map::new();
        for field in schema.fields() {
            if field.invisible || matches!(field.kind, FieldKind::Alias { .. }) {
                continue;
            }
            let Some(slot) = self.values.get(&field.name) else {
                continue;
            };
            let value = match self.serialize_slot(slot, opts, date_to_iso) {
                Some(v) => v,
                None => continue,
            };
            let value = match (&field.getter, slot) {
                (Some(_), FieldValue::Doc(_)) => value,
                (Some(getter), _) => getter(value),
                (None, _) => value,
            };
            map.insert(field.name.clone(), value);
        }

        if opts.virtuals {
            for name in schema.virtual_names() {
                if let Some(virtual_def) = schema.virtual_def(name) {
                    map.insert(name.to_string(), (virtual_def.get)(self));
                }
            }
        }

        let mut out = Value::Object(map);
        if minimize {
            minimize_value(&mut out);
        }

        let transform = opts
            .transform
            .clone()
            .or_else(|| schema.options().to_object_transform.clone());
        match transform {
            Some(transform) => transform(out),
            None => out,
        }
    }

    fn serialize_slot(
        &self,
        slot: &FieldValue,
        opts: &ToObjectOptions,
        date_to_iso: bool,
    ) -> Option<Value> {
        match slot {
            FieldValue::Missing => None,
            FieldValue::Value(v) => Some(v.clone()),
            FieldValue::Date(d) => Some(project_date(d, date_to_iso)),
            FieldValue::Doc(doc) => Some(doc.to_object(&ToObjectOptions {
                transform: None,
                minimize: opts.minimize,
                virtuals: opts.virtuals,
                date_to_iso: opts.date_to_iso,
            })),
            FieldValue::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| self.serialize_slot(item, opts, date_to_iso))
                    .collect(),
            )),
        }
    }

    /// JSON serialization: like `to_object`, with ISO dates and the
    /// schema's `to_json` transform by default
    pub fn to_json(&self) -> Value {
        let transform = self.ctx.schema.options().to_json_transform.clone();
        self.to_object(&ToObjectOptions {
            transform,
            minimize: None,
            virtuals: false,
            date_to_iso: Some(true),
        })
    }

    // ------------------------------------------------------------------
    // Engine access
    // ------------------------------------------------------------------

    pub(crate) fn slot(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub(crate) fn slot_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.values.get_mut(name)
    }

    pub(crate) fn put_slot(&mut self, name: &str, slot: FieldValue) {
        self.values.insert(name.to_string(), slot);
    }

    /// Stringified current values of every indexed field, arrays expanded
    pub(crate) fn indexed_value_set(&self) -> HashMap<String, BTreeSet<String>> {
        let mut out = HashMap::new();
        for field in self.ctx.schema.indexed_fields() {
            let mut values = BTreeSet::new();
            if let Some(slot) = self.values.get(&field.name) {
                collect_index_strings(slot, &mut values);
            }
            out.insert(field.name.clone(), values);
        }
        out
    }

    pub(crate) fn shadow(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.shadow
    }

    pub(crate) fn set_shadow(&mut self, shadow: HashMap<String, BTreeSet<String>>) {
        self.shadow = shadow;
    }
}

fn collect_index_strings(slot: &FieldValue, out: &mut BTreeSet<String>) {
    match slot {
        FieldValue::Missing => {}
        FieldValue::Value(Value::String(s)) => {
            out.insert(s.clone());
        }
        FieldValue::Value(Value::Number(n)) => {
            out.insert(n.to_string());
        }
        FieldValue::Value(_) => {}
        FieldValue::Date(d) => {
            out.insert(d.timestamp_millis().to_string());
        }
        FieldValue::Doc(doc) => {
            if let Some(key) = doc.key_value() {
                collect_index_strings(&FieldValue::Value(key), out);
            }
        }
        FieldValue::Array(items) => {
            for item in items {
                collect_index_strings(item, out);
            }
        }
    }
}

/// Recursively drop object entries holding empty objects or arrays
pub(crate) fn minimize_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                minimize_value(child);
            }
            map.retain(|_, v| match v {
                Value::Object(m) => !m.is_empty(),
                Value::Array(a) => !a.is_empty(),
                _ => true,
            });
        }
        Value::Array(items) => {
            for item in items {
                minimize_value(item);
            }
        }
        _ => {}
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("model", &self.ctx.name)
            .field("key", &self.key_value())
            .field("cas", &self.cas)
            .field("is_new", &self.is_new)
            .field("errors", &self.errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::field::KeyOptions;
    use serde_json::json;

    struct NullResolver;

    impl ModelResolver for NullResolver {
        fn resolve(&self, _name: &str) -> Option<Arc<ModelContext>> {
            None
        }
    }

    fn context(mut schema: Schema) -> Arc<ModelContext> {
        schema.compile(&Config::default()).unwrap();
        Arc::new(ModelContext {
            name: "Test".to_string(),
            schema: Arc::new(schema),
            store: Arc::new(MemoryStore::new()),
            config: Config::default(),
            resolver: Weak::<NullResolver>::new(),
        })
    }

    fn user_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add(FieldDescriptor::string("name"));
        schema.add(FieldDescriptor::number("age"));
        schema.add(FieldDescriptor::date("joined"));
        schema.add(FieldDescriptor::alias("full_name", "name"));
        schema
    }

    #[test]
    fn create_generates_uuid_key() {
        let doc = Document::create(context(user_schema()));
        let key = doc.key_value().unwrap();
        let key = key.as_str().unwrap();
        assert_eq!(key.len(), 36);
        assert!(doc.is_new());
        assert!(doc.cas().is_none());
    }

    #[test]
    fn provided_key_is_not_generated() {
        let mut schema = Schema::new();
        schema.add(FieldDescriptor::string("email").key_with(KeyOptions::provided()));
        let mut doc = Document::create(context(schema));
        assert!(doc.key_value().is_none());
        assert!(doc.storage_key().is_err());

        doc.set("email", json!("b@x"));
        assert_eq!(doc.storage_key().unwrap(), "b@x");
    }

    #[test]
    fn defaults_apply_on_create() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::string("role").with_default(json!("member")));
        schema.add(
            FieldDescriptor::string("display")
                .with_computed_default(|doc| doc.get("role").unwrap_or(Value::Null)),
        );
        let doc = Document::create(context(schema));
        assert_eq!(doc.get("role"), Some(json!("member")));
        assert_eq!(doc.get("display"), Some(json!("member")));
    }

    #[test]
    fn set_rejections_keep_prior_value_and_accumulate() {
        let mut doc = Document::create(context(user_schema()));
        assert!(doc.set("age", json!(30)));
        assert!(!doc.set("age", json!("not a number")));

        assert_eq!(doc.get("age"), Some(json!(30)));
        assert!(doc.has_errors());
        let err = &doc.errors()[0];
        assert_eq!(err.field, "age");
        assert_eq!(err.attempted, json!("not a number"));
        assert_eq!(err.previous, json!(30));

        doc.clear_errors();
        assert!(!doc.has_errors());
    }

    #[test]
    fn read_only_fields_reject_set() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::string("ssn").read_only());
        let mut doc = Document::create(context(schema));
        assert!(!doc.set("ssn", json!("123")));
        assert_eq!(doc.errors()[0].message, "field is read-only");
    }

    #[test]
    fn alias_reads_and_writes_through() {
        let mut doc = Document::create(context(user_schema()));
        assert!(doc.set("full_name", json!("Bob")));
        assert_eq!(doc.get("name"), Some(json!("Bob")));
        assert_eq!(doc.get("full_name"), Some(json!("Bob")));
    }

    #[test]
    fn transform_runs_before_typecast() {
        let mut schema = user_schema();
        schema.add(
            FieldDescriptor::string("code")
                .with_transform(|v| match v {
                    Value::String(s) => Value::String(s.trim().to_string()),
                    other => other,
                }),
        );
        let mut doc = Document::create(context(schema));
        doc.set("code", json!("  abc  "));
        assert_eq!(doc.get("code"), Some(json!("abc")));
    }

    #[test]
    fn validator_cancels_commit() {
        let mut schema = user_schema();
        schema.add(
            FieldDescriptor::number("percent").with_validator(|v| {
                v.as_f64().map_or(false, |n| (0.0..=100.0).contains(&n))
            }),
        );
        let mut doc = Document::create(context(schema));
        assert!(doc.set("percent", json!(50)));
        assert!(!doc.set("percent", json!(200)));
        assert_eq!(doc.get("percent"), Some(json!(50)));
    }

    #[test]
    fn schema_guard_and_observer_wrap_commit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_in_hook = observed.clone();

        let schema = user_schema();
        let mut options = crate::models::schema::SchemaOptions::default();
        options.on_before_value_set = Some(Arc::new(|_, name, _| name != "age"));
        options.on_value_set = Some(Arc::new(move |_, _, _| {
            observed_in_hook.fetch_add(1, Ordering::SeqCst);
        }));
        let mut guarded = Schema::with_options(options);
        guarded.extend(&schema);

        let mut doc = Document::create(context(guarded));
        assert!(doc.set("name", json!("Ann")));
        assert!(!doc.set("age", json!(30)));
        assert_eq!(doc.get("age"), None);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn getter_applies_on_read_and_serialization() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::string("masked").with_getter(|v| match v {
            Value::String(s) => Value::String(format!("***{}", &s[s.len().saturating_sub(2)..])),
            other => other,
        }));
        let mut doc = Document::create(context(schema));
        doc.set("masked", json!("secret"));
        assert_eq!(doc.get("masked"), Some(json!("***et")));
        let obj = doc.to_object(&ToObjectOptions::default());
        assert_eq!(obj["masked"], json!("***et"));
    }

    #[test]
    fn virtuals_compute_and_optionally_set() {
        let mut schema = user_schema();
        schema.add_virtual_with_setter(
            "title",
            |doc| {
                let name = doc.get("name").and_then(|v| v.as_str().map(String::from));
                Value::String(format!("Dr. {}", name.unwrap_or_default()))
            },
            |doc, value| {
                doc.set("name", value);
            },
        );
        let mut doc = Document::create(context(schema));
        doc.set("title", json!("Who"));
        assert_eq!(doc.get("name"), Some(json!("Who")));
        assert_eq!(doc.get("title"), Some(json!("Dr. Who")));

        let with_virtuals = doc.to_object(&ToObjectOptions {
            virtuals: true,
            ..Default::default()
        });
        assert_eq!(with_virtuals["title"], json!("Dr. Who"));
        let without = doc.to_object(&ToObjectOptions::default());
        assert!(without.get("title").is_none());
    }

    #[test]
    fn methods_dispatch_by_name() {
        let mut schema = user_schema();
        schema.add_method("birthday", |doc, _| {
            let age = doc.get("age").and_then(|v| v.as_i64()).unwrap_or(0);
            doc.set("age", json!(age + 1));
            json!(age + 1)
        });
        let mut doc = Document::create(context(schema));
        doc.set("age", json!(41));
        assert_eq!(doc.call("birthday", Value::Null), Some(json!(42)));
        assert_eq!(doc.get("age"), Some(json!(42)));
        assert_eq!(doc.call("unknown", Value::Null), None);
    }

    #[test]
    fn to_object_minimize_and_dates() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::any("meta"));
        let mut doc = Document::create(context(schema));
        doc.set("name", json!("Ann"));
        doc.set("joined", json!("2025-06-01T12:00:00Z"));
        doc.set("meta", json!({}));

        let minimized = doc.to_object(&ToObjectOptions::default());
        assert!(minimized.get("meta").is_none());
        assert_eq!(minimized["joined"], json!(1748779200000i64));

        let full = doc.to_object(&ToObjectOptions {
            minimize: Some(false),
            ..Default::default()
        });
        assert_eq!(full["meta"], json!({}));

        let json_form = doc.to_json();
        assert_eq!(json_form["joined"], json!("2025-06-01T12:00:00+00:00"));
    }

    #[test]
    fn to_object_transform_runs_last() {
        let mut doc = Document::create(context(user_schema()));
        doc.set("name", json!("Ann"));
        let transformed = doc.to_object(&ToObjectOptions {
            transform: Some(Arc::new(|mut v| {
                if let Value::Object(map) = &mut v {
                    map.remove("id");
                }
                v
            })),
            ..Default::default()
        });
        assert!(transformed.get("id").is_none());
        assert_eq!(transformed["name"], json!("Ann"));
    }

    #[test]
    fn invisible_fields_are_not_serialized() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::string("secret").invisible());
        let mut doc = Document::create(context(schema));
        doc.set("secret", json!("hidden"));
        doc.set("name", json!("Ann"));

        assert_eq!(doc.get("secret"), Some(json!("hidden")));
        let obj = doc.to_object(&ToObjectOptions::default());
        assert!(obj.get("secret").is_none());
    }

    #[test]
    fn hydrate_bypasses_validation_and_snapshots_indexes() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::string("email").indexed());
        schema.add(
            FieldDescriptor::number("score").with_validator(|_| false),
        );
        let ctx = context(schema);

        let body = json!({
            "id": "u1",
            "name": "Ann",
            "email": "a@b",
            "score": 12
        });
        let doc = Document::hydrate(ctx, &body, Cas::new(7));

        assert!(!doc.is_new());
        assert_eq!(doc.cas(), Some(Cas::new(7)));
        assert_eq!(doc.get("score"), Some(json!(12)));
        let shadow = doc.shadow();
        assert!(shadow["email"].contains("a@b"));
    }

    #[test]
    fn indexed_value_set_expands_arrays_and_documents() {
        let mut schema = user_schema();
        schema.add(FieldDescriptor::array_of("emails", FieldDescriptor::string("email")).indexed());
        let mut doc = Document::create(context(schema));
        doc.set("emails", json!(["a@b", "c@d"]));

        let values = doc.indexed_value_set();
        assert_eq!(
            values["emails"],
            BTreeSet::from(["a@b".to_string(), "c@d".to_string()])
        );
    }

    #[test]
    fn set_document_checks_model_name() {
        let mut parent_schema = Schema::new();
        parent_schema.add(FieldDescriptor::string("name"));
        parent_schema.add(FieldDescriptor::reference("company", "Company"));
        let mut parent = Document::create(context(parent_schema));

        let other = Document::create(context(user_schema()));
        assert!(!parent.set_document("company", other));
        assert!(parent.has_errors());

        // Scalar keys are always accepted on reference fields.
        assert!(parent.set("company", json!("acme-1")));
        assert_eq!(parent.get("company"), Some(json!("acme-1")));
    }
}
