//! Docmap Core - Schema-Driven Object-Document Mapping
//!
//! This crate maps typed, schema-validated documents onto a
//! document-oriented key-value store with per-key CRUD, atomic counters,
//! and compare-and-swap tokens.
//!
//! # Architecture
//!
//! - **Schemas, not structs**: models are declared at runtime from field
//!   descriptors; documents are validating property bags
//! - **Derived keys**: storage keys come from the key field plus
//!   configurable prefix/suffix/delimiter
//! - **Embedded documents**: model-typed fields persist independently and
//!   are referenced by key; saves and removes walk the graph
//! - **Lookup documents**: indexed fields maintain `{key: ...}` records
//!   for secondary lookup, updated atomically under CAS
//!
//! # Modules
//!
//! - [`models`] - fields, schemas, documents, key codec, hooks, events
//! - [`db`] - the `Store` trait, error set, in-memory backend, retries
//! - [`services`] - the `Odm` handle, document engine, index maintenance
//! - [`config`] - connection-wide options
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use docmap_core::db::MemoryStore;
//! use docmap_core::models::{FieldDescriptor, KeyOptions, Schema};
//! use docmap_core::services::{Odm, SaveOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docmap_core::services::OdmError> {
//!     let odm = Odm::new(Arc::new(MemoryStore::new()));
//!
//!     let mut schema = Schema::new();
//!     schema.add(FieldDescriptor::string("name"));
//!     schema.add(
//!         FieldDescriptor::string("email")
//!             .key_with(KeyOptions::provided())
//!             .indexed(),
//!     );
//!     let users = odm.define("User", schema)?;
//!
//!     let mut bob = users.create_from(json!({"name": "Bob", "email": "b@x"}));
//!     bob.save(&SaveOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-exports
pub use config::Config;
#[cfg(feature = "memory")]
pub use db::MemoryStore;
pub use db::{Cas, Store, StoreError};
pub use models::{
    Document, DocumentEvent, EventKind, FieldDescriptor, FieldKind, KeyOptions, Schema,
    SchemaOptions, SetError,
};
pub use services::{FindOptions, FindResult, Model, Odm, OdmError, RemoveOptions, SaveOptions};
