//! Model Registry - the ODM Handle
//!
//! An [`Odm`] owns the store client, the connection [`Config`], and the
//! models defined against them. Models are compiled once at `define` time
//! and immutable afterwards; the registry is the only mutable map and is
//! write-once per name.
//!
//! There is no process-wide state: two `Odm` handles are fully
//! independent, even over the same store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::db::Store;
use crate::models::document::{Document, ModelContext, ModelResolver};
use crate::models::schema::Schema;
use crate::services::error::OdmError;

pub(crate) struct OdmInner {
    store: Arc<dyn Store>,
    config: Config,
    models: RwLock<HashMap<String, Arc<ModelContext>>>,
}

impl ModelResolver for OdmInner {
    fn resolve(&self, name: &str) -> Option<Arc<ModelContext>> {
        let models = self.models.read().expect("model registry lock poisoned");
        models.get(name).cloned()
    }
}

/// Scoped ODM handle: store client + config + named models
#[derive(Clone)]
pub struct Odm {
    inner: Arc<OdmInner>,
}

impl Odm {
    /// Create a handle over `store` with default configuration
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Create a handle over `store` with explicit configuration
    pub fn with_config(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            inner: Arc::new(OdmInner {
                store,
                config,
                models: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Compile `schema` against this handle's config and register it as
    /// the model `name`
    ///
    /// # Errors
    ///
    /// - [`OdmError::Schema`] when the schema fails to compile
    /// - [`OdmError::ModelAlreadyDefined`] when the name is taken
    pub fn define(&self, name: impl Into<String>, mut schema: Schema) -> Result<Model, OdmError> {
        let name = name.into();
        schema.compile(&self.inner.config)?;

        let inner_dyn: Arc<dyn ModelResolver> = self.inner.clone();
        let resolver: Weak<dyn ModelResolver> = Arc::downgrade(&inner_dyn);
        let ctx = Arc::new(ModelContext {
            name: name.clone(),
            schema: Arc::new(schema),
            store: self.inner.store.clone(),
            config: self.inner.config.clone(),
            resolver,
        });

        let mut models = self
            .inner
            .models
            .write()
            .expect("model registry lock poisoned");
        if models.contains_key(&name) {
            return Err(OdmError::ModelAlreadyDefined { name });
        }
        models.insert(name.clone(), ctx.clone());
        debug!(model = %name, "model defined");
        Ok(Model { ctx })
    }

    /// Resolve a previously defined model by name
    pub fn model(&self, name: &str) -> Option<Model> {
        self.inner.resolve(name).map(|ctx| Model { ctx })
    }

    /// Names of every defined model, unordered
    pub fn model_names(&self) -> Vec<String> {
        let models = self
            .inner
            .models
            .read()
            .expect("model registry lock poisoned");
        models.keys().cloned().collect()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }
}

impl std::fmt::Debug for Odm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Odm")
            .field("models", &self.model_names())
            .finish()
    }
}

/// A compiled, registered model: factory and query surface for its
/// documents
#[derive(Clone, Debug)]
pub struct Model {
    pub(crate) ctx: Arc<ModelContext>,
}

impl Model {
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn schema(&self) -> &Schema {
        self.ctx.schema()
    }

    /// Instantiate an empty document: defaults applied, key generated
    /// when the key field asks for it
    pub fn create(&self) -> Document {
        Document::create(self.ctx.clone())
    }

    /// Instantiate a document and write `data` through the validation
    /// pipeline
    ///
    /// Rejected fields accumulate on the returned document's error list.
    pub fn create_from(&self, data: Value) -> Document {
        let mut doc = self.create();
        doc.set_many(data);
        doc
    }

    /// Invoke a schema-registered static helper by name
    pub fn call_static(&self, name: &str, args: Value) -> Option<Value> {
        let f = self.ctx.schema().static_fn(name).cloned()?;
        Some(f(args))
    }
}
