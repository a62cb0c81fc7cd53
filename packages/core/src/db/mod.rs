//! Store Layer
//!
//! Everything that talks to, or stands in for, the underlying document
//! store:
//!
//! - [`Store`] - async trait over per-key CRUD, counters, and locking
//! - [`StoreError`] - the closed error set backends must map onto
//! - [`MemoryStore`] - in-process reference backend (feature `memory`)
//! - bounded retry of temporary failures
//!
//! The engine never names a concrete backend; it only sees
//! `Arc<dyn Store>`.

mod error;
#[cfg(feature = "memory")]
mod memory;
mod retry;
mod store;

pub use error::StoreError;
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use retry::{with_temp_retry, RetryPolicy};
pub use store::{Cas, Fetched, MultiFetch, Store, WriteOptions};
