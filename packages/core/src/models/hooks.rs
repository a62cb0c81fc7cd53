//! Lifecycle Hook Chains
//!
//! User-supplied middleware run around lifecycle operations (`save`,
//! `remove`, and any custom event name). Pre-hooks run in registration
//! order and complete by resolving their future; the first error
//! short-circuits the chain and aborts the operation before any store
//! write. Post-hooks receive the finished document and no control signal;
//! their errors are reported as `error` events and never reverse the
//! operation.
//!
//! A synchronous hook is simply one whose future is immediately ready, so
//! both styles share one signature.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::models::document::Document;

/// Error raised by a pre-hook to abort the surrounding operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Middleware error: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Future returned by a hook invocation
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>;

/// Pre-hook: may mutate the document, may fail the operation
pub type PreHookFn = Arc<dyn for<'a> Fn(&'a mut Document) -> HookFuture<'a> + Send + Sync>;

/// Post-hook: observes the finished document
pub type PostHookFn = Arc<dyn for<'a> Fn(&'a Document) -> HookFuture<'a> + Send + Sync>;

/// Wrap a synchronous pre-hook closure into the async hook signature
pub fn pre_sync(
    f: impl Fn(&mut Document) -> Result<(), HookError> + Send + Sync + 'static,
) -> impl for<'a> Fn(&'a mut Document) -> HookFuture<'a> + Send + Sync + 'static {
    move |doc| {
        let result = f(doc);
        Box::pin(std::future::ready(result))
    }
}

/// Wrap a synchronous post-hook closure into the async hook signature
pub fn post_sync(
    f: impl Fn(&Document) -> Result<(), HookError> + Send + Sync + 'static,
) -> impl for<'a> Fn(&'a Document) -> HookFuture<'a> + Send + Sync + 'static {
    move |doc| {
        let result = f(doc);
        Box::pin(std::future::ready(result))
    }
}

#[derive(Clone, Default)]
struct HookChain {
    pre: Vec<PreHookFn>,
    post: Vec<PostHookFn>,
}

/// Hook chains keyed by event name
///
/// `save` and `remove` are run by the engine; any other name is a custom
/// event runnable through `Document::run_hook`.
#[derive(Clone, Default)]
pub struct HookSet {
    chains: HashMap<String, HookChain>,
}

impl HookSet {
    /// Append a pre-hook to the named chain
    pub fn add_pre(
        &mut self,
        event: impl Into<String>,
        hook: impl for<'a> Fn(&'a mut Document) -> HookFuture<'a> + Send + Sync + 'static,
    ) {
        self.chains
            .entry(event.into())
            .or_default()
            .pre
            .push(Arc::new(hook));
    }

    /// Append a post-hook to the named chain
    pub fn add_post(
        &mut self,
        event: impl Into<String>,
        hook: impl for<'a> Fn(&'a Document) -> HookFuture<'a> + Send + Sync + 'static,
    ) {
        self.chains
            .entry(event.into())
            .or_default()
            .post
            .push(Arc::new(hook));
    }

    /// Snapshot of the pre-chain for an event, in registration order
    pub(crate) fn pre_chain(&self, event: &str) -> Vec<PreHookFn> {
        self.chains
            .get(event)
            .map(|c| c.pre.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the post-chain for an event, in registration order
    pub(crate) fn post_chain(&self, event: &str) -> Vec<PostHookFn> {
        self.chains
            .get(event)
            .map(|c| c.post.clone())
            .unwrap_or_default()
    }

    /// Event names with at least one hook registered
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Whether the named event has any hooks
    pub fn has_event(&self, event: &str) -> bool {
        self.chains.contains_key(event)
    }

    /// Copy chains from `base` whose event names are absent here
    ///
    /// Shallow diff by name: a chain defined locally completely shadows
    /// the base chain of the same event.
    pub(crate) fn merge_absent(&mut self, base: &HookSet) {
        for (event, chain) in &base.chains {
            self.chains
                .entry(event.clone())
                .or_insert_with(|| chain.clone());
        }
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.chains.keys().collect();
        events.sort();
        f.debug_struct("HookSet").field("events", &events).finish()
    }
}
