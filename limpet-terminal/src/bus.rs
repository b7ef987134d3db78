//! Process-local event bus
//!
//! One mechanism for two jobs: intra-app decoupling (a hook finishes
//! a mutation and anyone interested hears about it) and cross-terminal
//! reconciliation (remote-origin sync events re-enter the process
//! here). Dispatch is synchronous and ordered by subscription order;
//! a panicking handler is isolated so the remaining handlers on the
//! topic still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::notify::Notification;
use shared::sync::SyncEvent;

/// Where a sync event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced by a mutation on this terminal
    Local,
    /// Pushed from the backend or another terminal
    Remote,
}

/// Everything that travels on the bus
#[derive(Clone)]
pub enum BusEvent {
    /// An entity changed; topic is `sync:<resource>:<action>`
    Sync { event: SyncEvent, origin: Origin },
    /// User-facing alert
    Notification(Notification),
    /// Connectivity transition
    Connectivity { online: bool },
}

impl BusEvent {
    /// Topic the event is delivered on
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Sync { event, .. } => event.topic(),
            Self::Notification(_) => "notify",
            Self::Connectivity { .. } => "connectivity",
        }
    }
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

struct Registry {
    /// Subscription id -> (topic pattern, handler); ids are monotonic
    /// so sorting by id recovers subscription order
    handlers: DashMap<u64, (String, Handler)>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl std::fmt::Debug for BusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync { event, origin } => f
                .debug_struct("Sync")
                .field("topic", &event.topic())
                .field("id", &event.entity_id())
                .field("origin", origin)
                .finish(),
            Self::Notification(n) => f.debug_struct("Notification").field("title", &n.title).finish(),
            Self::Connectivity { online } => {
                f.debug_struct("Connectivity").field("online", online).finish()
            }
        }
    }
}

/// Scoped subscription handle
///
/// Dropping the handle (or calling `unsubscribe`) removes the handler
/// on every exit path of the owning component's lifetime.
#[must_use = "dropping the subscription removes the handler"]
pub struct Subscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.remove(&self.id);
        }
    }
}

/// Publish/subscribe registry, cheap to clone
#[derive(Debug, Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                handlers: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for a topic pattern
    ///
    /// Patterns are exact topics, a prefix ending in `*`
    /// (`"sync:cashier:*"`), or `"*"` for everything.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .handlers
            .insert(id, (pattern.into(), Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Deliver an event to every matching handler, synchronously
    ///
    /// At-most-once per handler per emit. Handlers run outside the
    /// registry locks, so a handler may subscribe or unsubscribe;
    /// such changes take effect on the next emit.
    pub fn emit(&self, event: &BusEvent) {
        let topic = event.topic();
        let mut matching: Vec<(u64, Handler)> = self
            .registry
            .handlers
            .iter()
            .filter(|entry| pattern_matches(&entry.value().0, topic))
            .map(|entry| (*entry.key(), entry.value().1.clone()))
            .collect();
        matching.sort_by_key(|(id, _)| *id);

        for (id, handler) in matching {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(topic = %topic, subscription = id, "Event handler panicked");
            }
        }
    }

    /// Number of live subscriptions (diagnostics)
    pub fn subscription_count(&self) -> usize {
        self.registry.handlers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}
