//! Document Lifecycle Events
//!
//! Events emitted by document instances when data changes. Listeners are
//! registered per instance through an explicit observer registry; there is
//! no process-wide bus, so subscribing to one document never observes
//! another.
//!
//! # Event Flow
//!
//! 1. The engine completes a lifecycle operation (save, remove, index)
//! 2. The matching event is emitted on the instance
//! 3. Every listener registered for that event kind runs, in registration
//!    order

use std::fmt;
use std::sync::Arc;

/// The event kinds a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A save completed
    Save,
    /// A remove completed
    Remove,
    /// An index maintenance pass finished (with or without failures)
    Index,
    /// A non-fatal error surfaced outside the operation's return path
    Error,
}

/// A lifecycle event emitted on a document instance
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    /// The document was persisted under `key`
    Saved { key: String },

    /// The document was deleted from the store
    Removed { key: String },

    /// Index maintenance finished; `error` is set when a lookup update
    /// failed
    Indexed { error: Option<String> },

    /// A deferred error (post-hook failure, index failure with
    /// `emit_errors`)
    Errored { message: String },
}

impl DocumentEvent {
    /// The kind listeners subscribe under
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Saved { .. } => EventKind::Save,
            Self::Removed { .. } => EventKind::Remove,
            Self::Indexed { .. } => EventKind::Index,
            Self::Errored { .. } => EventKind::Error,
        }
    }
}

/// Callback invoked when a subscribed event fires
pub type EventListener = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

/// Per-document observer registry
#[derive(Clone, Default)]
pub struct Listeners {
    subscriptions: Vec<(EventKind, EventListener)>,
}

impl Listeners {
    /// Register a listener for one event kind
    pub fn on(&mut self, kind: EventKind, listener: impl Fn(&DocumentEvent) + Send + Sync + 'static) {
        self.subscriptions.push((kind, Arc::new(listener)));
    }

    /// Fire an event to every listener subscribed to its kind
    pub(crate) fn emit(&self, event: &DocumentEvent) {
        let kind = event.kind();
        for (subscribed, listener) in &self.subscriptions {
            if *subscribed == kind {
                listener(event);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_only_matching_kind() {
        let saves = Arc::new(AtomicUsize::new(0));
        let removes = Arc::new(AtomicUsize::new(0));

        let mut listeners = Listeners::default();
        let counter = saves.clone();
        listeners.on(EventKind::Save, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = removes.clone();
        listeners.on(EventKind::Remove, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&DocumentEvent::Saved { key: "k".into() });
        listeners.emit(&DocumentEvent::Saved { key: "k".into() });
        listeners.emit(&DocumentEvent::Removed { key: "k".into() });

        assert_eq!(saves.load(Ordering::SeqCst), 2);
        assert_eq!(removes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_kinds() {
        assert_eq!(
            DocumentEvent::Indexed { error: None }.kind(),
            EventKind::Index
        );
        assert_eq!(
            DocumentEvent::Errored {
                message: "x".into()
            }
            .kind(),
            EventKind::Error
        );
    }
}
