//! Listener registry and event dispatch.
//!
//! Listeners are keyed by [`EventKind`] and fire in registration order.
//! Duplicate registrations are permitted; each one gets its own
//! [`ListenerId`] so exactly one instance can be removed. Dispatch snapshots
//! the handler list before invoking, so a listener may register, unregister,
//! or disconnect the channel without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

use crate::realtime::proto::{ChannelEvent, EventKind};

pub(crate) type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Identifier minted for a single listener registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

struct RegisteredListener {
    id: ListenerId,
    handler: EventHandler,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: HashMap<EventKind, Vec<RegisteredListener>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub(crate) fn register(&mut self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries
            .entry(kind)
            .or_default()
            .push(RegisteredListener { id, handler });
        id
    }

    /// Removes the registration with `id` under `kind`; no-op if absent.
    pub(crate) fn unregister(&mut self, kind: &EventKind, id: ListenerId) -> bool {
        let Some(listeners) = self.entries.get_mut(kind) else {
            return false;
        };
        let Some(index) = listeners.iter().position(|entry| entry.id == id) else {
            return false;
        };
        listeners.remove(index);
        if listeners.is_empty() {
            self.entries.remove(kind);
        }
        true
    }

    /// Snapshot of the handlers for `kind`, in registration order.
    pub(crate) fn handlers_for(&self, kind: &EventKind) -> Vec<EventHandler> {
        self.entries
            .get(kind)
            .map(|listeners| {
                listeners
                    .iter()
                    .map(|entry| Arc::clone(&entry.handler))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn registered_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Unregister capability returned by [`GameChannel::on`].
///
/// Consuming [`Subscription::unsubscribe`] removes exactly the registration
/// that produced it. Dropping the value without calling it leaves the
/// listener registered.
///
/// [`GameChannel::on`]: crate::realtime::channel::GameChannel::on
#[must_use = "dropping a Subscription leaves the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    registry: Weak<Mutex<ListenerRegistry>>,
    kind: EventKind,
    id: ListenerId,
}

impl Subscription {
    pub(crate) fn new(
        registry: Weak<Mutex<ListenerRegistry>>,
        kind: EventKind,
        id: ListenerId,
    ) -> Self {
        Self { registry, kind, id }
    }

    /// Kind this subscription was registered under.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Identifier of this registration, usable with `GameChannel::off`.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes this registration. No-op if it was already removed or the
    /// channel is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut guard) = registry.lock() {
                guard.unregister(&self.kind, self.id);
            }
        }
    }
}

/// Invokes every listener registered for the event's kind, in registration
/// order. Each invocation is isolated: a panicking listener is logged and
/// does not prevent delivery to the next one.
pub(crate) fn dispatch_event(registry: &Mutex<ListenerRegistry>, event: &ChannelEvent) {
    let handlers = match registry.lock() {
        Ok(guard) => guard.handlers_for(&event.kind()),
        Err(_) => return,
    };
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            error!(event = "listener_panicked", kind = %event.kind());
        }
    }
}
