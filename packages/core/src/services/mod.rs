//! Engine Services
//!
//! The orchestration layer over models and the store:
//!
//! - `model_registry` - the [`Odm`] handle and compiled [`Model`]s
//! - `document_service` - save, remove, find, and population
//! - `index_service` - lookup-document maintenance and `find_by`
//! - `error` - engine error types

mod document_service;
mod error;
mod index_service;
mod model_registry;

pub use document_service::{
    FindIds, FindOptions, FindResult, Populate, RemoveOptions, SaveOptions,
};
pub use error::OdmError;
pub use model_registry::{Model, Odm};
