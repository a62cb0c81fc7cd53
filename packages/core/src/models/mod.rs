//! Data Model Layer
//!
//! Everything that defines and holds typed document data, I/O free:
//!
//! - `field` - field descriptors: kinds, constraints, key/index attributes
//! - `schema` - schema construction, extension, and compilation
//! - `value` - typecast rules and accumulated write errors
//! - `document` - the mutable document instance and serialization
//! - `keys` - storage-key and lookup-key codec
//! - `hooks` - lifecycle middleware chains
//! - `events` - per-instance lifecycle events

pub mod document;
pub mod events;
pub mod field;
pub mod hooks;
pub mod keys;
pub mod schema;
pub mod value;

pub use document::{Document, ModelContext, ModelResolver, ToObjectOptions};
pub use events::{DocumentEvent, EventKind};
pub use field::{
    ArrayConstraints, DefaultValue, FieldDescriptor, FieldKind, KeyOptions, NumberConstraints,
    StringConstraints,
};
pub use hooks::{post_sync, pre_sync, HookError, HookSet};
pub use keys::KeyError;
pub use schema::{Schema, SchemaError, SchemaOptions, VirtualDescriptor};
pub use value::{FieldValue, SetError};
