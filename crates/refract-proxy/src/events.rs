//! Lifecycle event notification.
//!
//! A composed notifier rather than an inheritance hierarchy: an explicit
//! mapping from event kind to an ordered subscriber list, exposed through
//! subscribe/publish on the proxy instance.

use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Listening,
    Request,
    Response,
    Close,
    Error,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub detail: String,
}

impl Event {
    pub fn new(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Maps event kinds to ordered subscriber lists.
#[derive(Default)]
pub struct Notifier {
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for an event kind. Subscribers fire in
    /// registration order.
    pub fn subscribe<F>(&self, kind: EventKind, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push(Box::new(f));
    }

    pub fn publish(&self, event: &Event) {
        if let Some(list) = self.subscribers.read().get(&event.kind) {
            for subscriber in list {
                subscriber(event);
            }
        }
    }
}
