//! Listener registry: typed pub/sub fan-out for decoded events.
//!
//! Dispatch iterates over a snapshot of the listeners taken when it starts,
//! so listeners may subscribe or unsubscribe (themselves included) from
//! inside a callback. A listener that returns `Err` or panics is logged and
//! skipped; the rest of the dispatch proceeds.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::{Event, EventKind};

/// A subscriber callback.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Table {
    next_id: u64,
    entries: HashMap<EventKind, Vec<(u64, Listener)>>,
}

/// Shared table of listeners keyed by [`EventKind`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    table: Arc<Mutex<Table>>,
}

/// Handle returned by [`ListenerRegistry::on`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    kind: EventKind,
    id: u64,
    table: Weak<Mutex<Table>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove exactly this listener from exactly this kind.
    pub fn unsubscribe(self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock();
        if let Some(list) = table.entries.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                table.entries.remove(&self.kind);
            }
        }
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(kind, Arc::new(callback))
    }

    /// Register an already shared listener, keeping its identity for [`off`](Self::off).
    pub fn add(&self, kind: EventKind, listener: Listener) -> Subscription {
        let mut table = self.table.lock();
        table.next_id += 1;
        let id = table.next_id;
        table.entries.entry(kind).or_default().push((id, listener));
        Subscription {
            kind,
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Remove every registration of `listener` under `kind`. No-op if absent.
    pub fn off(&self, kind: EventKind, listener: &Listener) {
        let mut table = self.table.lock();
        if let Some(list) = table.entries.get_mut(&kind) {
            list.retain(|(_, l)| !Arc::ptr_eq(l, listener));
            if list.is_empty() {
                table.entries.remove(&kind);
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.table.lock().entries.get(&kind).map_or(0, Vec::len)
    }

    /// Drop every subscription of every kind.
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }

    /// Invoke every listener registered for `event.kind`.
    ///
    /// Returns how many listeners completed without error.
    pub fn dispatch(&self, event: &Event) -> usize {
        let snapshot: Vec<(u64, Listener)> = {
            let table = self.table.lock();
            match table.entries.get(&event.kind) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(kind = %event.kind, listener = id, error = %e, "Listener error");
                }
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    tracing::error!(kind = %event.kind, listener = id, panic = %msg, "Listener panicked");
                }
            }
        }
        delivered
    }
}
