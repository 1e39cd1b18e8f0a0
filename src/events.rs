//! Lifecycle event bus.
//!
//! Components announce index and provider lifecycle transitions as named events with a stable
//! payload shape. Delivery is synchronous: `emit` invokes every matching subscriber before it
//! returns, in subscription order, without holding any manager lock. Subscribers are plain
//! callbacks and must not panic; there is no ordering guarantee across distinct events.

use serde::Serialize;
use serde_json::Value;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kinds of lifecycle events emitted by the manager and the provider registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A live index was created from scratch.
    IndexCreated,
    /// A live index was destroyed without touching disk.
    IndexDestroyed,
    /// A live index was written to its cold form and released.
    IndexOffloaded,
    /// An offloaded index was hydrated back into memory.
    IndexResumed,
    /// Documents were accepted by a sandbox.
    DocumentAdded,
    /// Documents were removed from a sandbox.
    DocumentRemoved,
    /// A query round-trip completed.
    QueryCompleted,
    /// A background operation failed.
    Error,
    /// A provider was added to the registry.
    ProviderAdded,
    /// A provider was removed from the registry.
    ProviderRemoved,
    /// A provider entry was replaced.
    ProviderUpdated,
}

impl EventKind {
    /// Stable wire name of the event kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IndexCreated => "index_created",
            Self::IndexDestroyed => "index_destroyed",
            Self::IndexOffloaded => "index_offloaded",
            Self::IndexResumed => "index_resumed",
            Self::DocumentAdded => "document_added",
            Self::DocumentRemoved => "document_removed",
            Self::QueryCompleted => "query_completed",
            Self::Error => "error",
            Self::ProviderAdded => "provider_added",
            Self::ProviderRemoved => "provider_removed",
            Self::ProviderUpdated => "provider_updated",
        }
    }
}

/// A single lifecycle event with its payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Kind of the event.
    pub kind: EventKind,
    /// Index identifier the event concerns, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Provider identifier the event concerns, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Event-specific payload.
    pub data: Value,
}

impl Event {
    /// Build an event scoped to an index.
    pub fn for_index(kind: EventKind, instance_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            instance_id: Some(instance_id.into()),
            provider_id: None,
            data,
        }
    }

    /// Build an event scoped to a provider.
    pub fn for_provider(kind: EventKind, provider_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            instance_id: None,
            provider_id: Some(provider_id.into()),
            data,
        }
    }
}

/// Token returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Option<EventKind>,
    callback: Callback,
}

/// Synchronous fan-out of lifecycle events to registered subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Box::new(callback))
    }

    /// Register a callback invoked only for the given event kind.
    pub fn subscribe_to<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Box::new(callback))
    }

    fn register(&self, filter: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        subscribers.push(Subscriber {
            id,
            filter,
            callback,
        });
        SubscriptionId(id)
    }

    /// Remove a previously registered subscriber. Unknown tokens are ignored.
    pub fn unsubscribe(&self, token: SubscriptionId) {
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        subscribers.retain(|subscriber| subscriber.id != token.0);
    }

    /// Deliver an event to every matching subscriber, synchronously.
    pub fn emit(&self, event: &Event) {
        let subscribers = self.subscribers.read().expect("event bus lock poisoned");
        for subscriber in subscribers.iter() {
            if subscriber.filter.is_none_or(|kind| kind == event.kind) {
                (subscriber.callback)(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_to_all_subscribers_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(RwLock::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |event| {
                seen.write()
                    .unwrap()
                    .push((tag, event.kind.as_str().to_string()));
            });
        }

        bus.emit(&Event::for_index(
            EventKind::IndexCreated,
            "ws:a",
            json!({}),
        ));

        let seen = seen.read().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "first");
        assert_eq!(seen[1].0, "second");
    }

    #[test]
    fn filtered_subscriber_ignores_other_kinds() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe_to(EventKind::IndexOffloaded, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(&Event::for_index(EventKind::IndexCreated, "x", json!({})));
        bus.emit(&Event::for_index(EventKind::IndexOffloaded, "x", json!({})));

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let token = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(&Event::for_index(EventKind::IndexCreated, "x", json!({})));
        bus.unsubscribe(token);
        bus.emit(&Event::for_index(EventKind::IndexCreated, "x", json!({})));

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
