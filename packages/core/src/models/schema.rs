//! Schema Definition and Compilation
//!
//! A [`Schema`] is an ordered collection of [`FieldDescriptor`]s plus
//! schema-level options, virtuals, statics, instance methods, and hook
//! chains. Schemas are built mutable, then compiled once against the
//! connection [`Config`] when a model is defined; compilation resolves
//! option precedence, injects the synthetic `id` key field when no field
//! is marked as key, derives missing index names, and checks structural
//! invariants.
//!
//! Compiled schemas are immutable and shared (`Arc`) by every document of
//! the model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::models::document::Document;
use crate::models::field::{FieldDescriptor, FieldKind, KeyOptions};
use crate::models::hooks::{HookFuture, HookSet};
use crate::models::keys::derive_index_name;

/// Guard run before a field write commits; returning `false` cancels it
pub type ValueGuardFn = Arc<dyn Fn(&Document, &str, &Value) -> bool + Send + Sync>;

/// Observer run after a field write commits
pub type ValueNotifyFn = Arc<dyn Fn(&Document, &str, &Value) + Send + Sync>;

/// Post-serialization mapper for `to_object`/`to_json`
pub type ObjectTransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Model-level helper exposed by name on the model
pub type StaticFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Instance method dispatched by name on a document
pub type MethodFn = Arc<dyn Fn(&mut Document, Value) -> Value + Send + Sync>;

/// Virtual getter: computes a value from the document
pub type VirtualGetFn = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

/// Virtual setter: distributes a value onto real fields
pub type VirtualSetFn = Arc<dyn Fn(&mut Document, Value) + Send + Sync>;

/// A computed member: never persisted, optionally writable
#[derive(Clone)]
pub struct VirtualDescriptor {
    pub get: VirtualGetFn,
    pub set: Option<VirtualSetFn>,
}

/// Schema construction errors, raised at `define` time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// More than one field carries `key: true`
    #[error("Schema declares multiple key fields: '{first}' and '{second}'")]
    MultipleKeyFields { first: String, second: String },

    /// The key field must hold a string or number
    #[error("Key field '{field}' has non-scalar type '{kind}'")]
    InvalidKeyField { field: String, kind: String },

    /// An alias points at a field that does not exist
    #[error("Alias field '{field}' targets unknown field '{target}'")]
    UnknownAliasTarget { field: String, target: String },
}

/// Schema-level options; unset values fall back to the connection config
#[derive(Clone, Default)]
pub struct SchemaOptions {
    pub key_prefix: Option<String>,
    pub key_suffix: Option<String>,
    pub delimiter: Option<String>,
    pub ref_index_key_prefix: Option<String>,
    pub minimize: Option<bool>,
    pub store_full_reference_id: Option<bool>,
    pub store_full_key: Option<bool>,

    /// Default transform applied by `to_object` when the caller gives none
    pub to_object_transform: Option<ObjectTransformFn>,

    /// Default transform applied by `to_json` when the caller gives none
    pub to_json_transform: Option<ObjectTransformFn>,

    /// Guard consulted before every field write commits
    pub on_before_value_set: Option<ValueGuardFn>,

    /// Observer notified after every field write commits
    pub on_value_set: Option<ValueNotifyFn>,
}

impl fmt::Debug for SchemaOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaOptions")
            .field("key_prefix", &self.key_prefix)
            .field("key_suffix", &self.key_suffix)
            .field("delimiter", &self.delimiter)
            .field("ref_index_key_prefix", &self.ref_index_key_prefix)
            .field("minimize", &self.minimize)
            .field("store_full_reference_id", &self.store_full_reference_id)
            .field("store_full_key", &self.store_full_key)
            .finish()
    }
}

/// Option values after config fallback, captured at compile time
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub key_prefix: Option<String>,
    pub key_suffix: Option<String>,
    pub delimiter: String,
    pub ref_index_key_prefix: String,
    pub minimize: bool,
    pub store_full_reference_id: bool,
    pub store_full_key: bool,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self {
            key_prefix: None,
            key_suffix: None,
            delimiter: "_".to_string(),
            ref_index_key_prefix: "$_ref_by_".to_string(),
            minimize: true,
            store_full_reference_id: false,
            store_full_key: false,
        }
    }
}

impl ResolvedOptions {
    fn from_options(options: &SchemaOptions, config: Option<&Config>) -> Self {
        let defaults = Self::default();
        Self {
            key_prefix: options
                .key_prefix
                .clone()
                .or_else(|| config.and_then(|c| c.key_prefix.clone())),
            key_suffix: options
                .key_suffix
                .clone()
                .or_else(|| config.and_then(|c| c.key_suffix.clone())),
            delimiter: options
                .delimiter
                .clone()
                .or_else(|| config.map(|c| c.delimiter.clone()))
                .unwrap_or(defaults.delimiter),
            ref_index_key_prefix: options
                .ref_index_key_prefix
                .clone()
                .or_else(|| config.map(|c| c.ref_index_key_prefix.clone()))
                .unwrap_or(defaults.ref_index_key_prefix),
            minimize: options
                .minimize
                .or(config.map(|c| c.minimize))
                .unwrap_or(defaults.minimize),
            store_full_reference_id: options
                .store_full_reference_id
                .or(config.map(|c| c.store_full_reference_id))
                .unwrap_or(defaults.store_full_reference_id),
            store_full_key: options
                .store_full_key
                .or(config.map(|c| c.store_full_key))
                .unwrap_or(defaults.store_full_key),
        }
    }
}

/// An ordered, named collection of field descriptors plus model behavior
#[derive(Clone, Default)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    virtuals: HashMap<String, VirtualDescriptor>,
    statics: HashMap<String, StaticFn>,
    methods: HashMap<String, MethodFn>,
    hooks: HookSet,
    options: SchemaOptions,
    resolved: ResolvedOptions,
    key_field: Option<String>,
    compiled: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SchemaOptions) -> Self {
        let resolved = ResolvedOptions::from_options(&options, None);
        Self {
            options,
            resolved,
            ..Self::default()
        }
    }

    /// Append a field, or override an existing field of the same name
    pub fn add(&mut self, field: FieldDescriptor) -> &mut Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Register a computed member
    pub fn add_virtual(
        &mut self,
        name: impl Into<String>,
        get: impl Fn(&Document) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.virtuals.insert(
            name.into(),
            VirtualDescriptor {
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    /// Register a writable computed member
    pub fn add_virtual_with_setter(
        &mut self,
        name: impl Into<String>,
        get: impl Fn(&Document) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut Document, Value) + Send + Sync + 'static,
    ) -> &mut Self {
        self.virtuals.insert(
            name.into(),
            VirtualDescriptor {
                get: Arc::new(get),
                set: Some(Arc::new(set)),
            },
        );
        self
    }

    /// Register a model-level helper
    pub fn add_static(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.statics.insert(name.into(), Arc::new(f));
        self
    }

    /// Register an instance method
    pub fn add_method(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Document, Value) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a pre-hook on the named event chain
    pub fn pre(
        &mut self,
        event: impl Into<String>,
        hook: impl for<'a> Fn(&'a mut Document) -> HookFuture<'a> + Send + Sync + 'static,
    ) -> &mut Self {
        self.hooks.add_pre(event, hook);
        self
    }

    /// Register a post-hook on the named event chain
    pub fn post(
        &mut self,
        event: impl Into<String>,
        hook: impl for<'a> Fn(&'a Document) -> HookFuture<'a> + Send + Sync + 'static,
    ) -> &mut Self {
        self.hooks.add_post(event, hook);
        self
    }

    /// Copy from `base` every field, virtual, static, method, and hook
    /// chain whose name is absent here (shallow diff by name)
    pub fn extend(&mut self, base: &Schema) -> &mut Self {
        for field in &base.fields {
            if !self.fields.iter().any(|f| f.name == field.name) {
                self.fields.push(field.clone());
            }
        }
        for (name, virtual_def) in &base.virtuals {
            self.virtuals
                .entry(name.clone())
                .or_insert_with(|| virtual_def.clone());
        }
        for (name, f) in &base.statics {
            self.statics.entry(name.clone()).or_insert_with(|| f.clone());
        }
        for (name, f) in &base.methods {
            self.methods.entry(name.clone()).or_insert_with(|| f.clone());
        }
        self.hooks.merge_absent(&base.hooks);
        self
    }

    /// Resolve options against `config`, inject the synthetic key field if
    /// needed, derive index names, and check structural invariants
    pub fn compile(&mut self, config: &Config) -> Result<(), SchemaError> {
        self.resolved = ResolvedOptions::from_options(&self.options, Some(config));

        let key_names: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.is_key())
            .map(|f| f.name.clone())
            .collect();
        let key_name = match key_names.as_slice() {
            [] => {
                let synthetic = FieldDescriptor::string("id").key_with(KeyOptions::generated());
                self.fields.insert(0, synthetic);
                "id".to_string()
            }
            [single] => {
                let field = self.field(single).expect("key field just enumerated");
                if !matches!(field.kind, FieldKind::String(_) | FieldKind::Number(_)) {
                    return Err(SchemaError::InvalidKeyField {
                        field: field.name.clone(),
                        kind: field.kind.type_name().to_string(),
                    });
                }
                single.clone()
            }
            [first, second, ..] => {
                return Err(SchemaError::MultipleKeyFields {
                    first: first.clone(),
                    second: second.clone(),
                })
            }
        };
        self.key_field = Some(key_name);

        for field in &self.fields {
            if let FieldKind::Alias { target } = &field.kind {
                if !self.fields.iter().any(|f| &f.name == target) {
                    return Err(SchemaError::UnknownAliasTarget {
                        field: field.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        for field in &mut self.fields {
            if field.index && field.index_name.is_none() {
                field.index_name = Some(derive_index_name(&field.name));
            }
        }

        self.compiled = true;
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Fields in declaration order (key field first when synthetic)
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by name, without following aliases
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by name, following an alias to its target
    pub fn resolve_field(&self, name: &str) -> Option<&FieldDescriptor> {
        let field = self.field(name)?;
        match &field.kind {
            FieldKind::Alias { target } => self.field(target),
            _ => Some(field),
        }
    }

    /// The key field, available after compilation
    pub fn key_field(&self) -> Option<&FieldDescriptor> {
        self.key_field.as_deref().and_then(|name| self.field(name))
    }

    /// Indexed fields, in declaration order
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.index)
    }

    pub fn virtual_def(&self, name: &str) -> Option<&VirtualDescriptor> {
        self.virtuals.get(name)
    }

    pub fn virtual_names(&self) -> impl Iterator<Item = &str> {
        self.virtuals.keys().map(String::as_str)
    }

    pub fn static_fn(&self, name: &str) -> Option<&StaticFn> {
        self.statics.get(name)
    }

    pub fn method_fn(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Options after config fallback; stable once compiled
    pub fn resolved(&self) -> &ResolvedOptions {
        &self.resolved
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field("key_field", &self.key_field)
            .field("compiled", &self.compiled)
            .finish()
    }
}
