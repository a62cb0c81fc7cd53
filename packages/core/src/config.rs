//! Runtime Configuration
//!
//! Connection-wide defaults for key construction, index maintenance, retry
//! behavior, and result shaping. Every option here can be overridden per
//! schema (see `SchemaOptions`) and, for key affixes, per field.
//!
//! Precedence: field options > schema options > `Config`.

use serde::{Deserialize, Serialize};

/// Connection-wide ODM options
///
/// Constructed once and handed to [`crate::services::Odm`]; schemas compiled
/// against it capture the resolved values, so mutating a `Config` after
/// `define` has no effect on existing models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix prepended to every storage key (e.g. `"user::"`)
    pub key_prefix: Option<String>,

    /// Suffix appended to every storage key
    pub key_suffix: Option<String>,

    /// Store the fully expanded storage key in lookup documents and
    /// embedded reference fields instead of the user-visible key value
    pub store_full_reference_id: bool,

    /// Persist the key field as its full storage key rather than the
    /// user-visible value
    pub store_full_key: bool,

    /// Force the array result shape from `find` even for single-id input
    pub always_return_arrays: bool,

    /// Marker segment for lookup (secondary index) document keys
    pub ref_index_key_prefix: String,

    /// Separator used inside derived keys; user key values may not
    /// contain it
    pub delimiter: String,

    /// Fail a save when any of its lookup-document updates fail, instead
    /// of reporting them through `index` events
    pub wait_for_index: bool,

    /// Drop empty objects and arrays when serializing documents
    pub minimize: bool,

    /// Report the ids that were not found from multi-id lookups
    pub missing: bool,

    /// Return multi-id results in input order instead of store order
    pub keep_sort_order: bool,

    /// Retry store operations that fail with a temporary error
    pub retry_temporary_errors: bool,

    /// Maximum attempts for temporary-error retries
    pub temp_retry_times: u32,

    /// Delay between temporary-error retries, in milliseconds
    pub temp_retry_interval_ms: u64,

    /// Maximum attempts for CAS-conflict retries on lookup documents
    pub atomic_retry_times: u32,

    /// Delay between CAS-conflict retries, in milliseconds
    pub atomic_retry_interval_ms: u64,

    /// Serialize concurrent lookup-document updates with `get_and_lock`
    pub atomic_lock: bool,

    /// Fail `find_by` lookups whose lookup document points at a missing
    /// primary document, instead of resolving empty
    pub error_on_missing_index: bool,

    /// Additionally surface index failures as `error` events on the
    /// document instance
    pub emit_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_prefix: None,
            key_suffix: None,
            store_full_reference_id: false,
            store_full_key: false,
            always_return_arrays: false,
            ref_index_key_prefix: "$_ref_by_".to_string(),
            delimiter: "_".to_string(),
            wait_for_index: false,
            minimize: true,
            missing: true,
            keep_sort_order: false,
            retry_temporary_errors: false,
            temp_retry_times: 5,
            temp_retry_interval_ms: 50,
            atomic_retry_times: 5,
            atomic_retry_interval_ms: 0,
            atomic_lock: true,
            error_on_missing_index: false,
            emit_errors: true,
        }
    }
}
