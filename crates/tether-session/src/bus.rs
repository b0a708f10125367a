//! Target-event bus
//!
//! Fans target events out to typed subscribers. Delivery is synchronous
//! on the thread that received the engine notification and happens
//! outside the session lock. Subscribers for the event's specific kind
//! run before catch-all subscribers; within a list, registration order
//! is invocation order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use tether_common::{TargetEvent, TargetEventKind};

/// Identifier returned by subscribe calls, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback = Arc<dyn Fn(&TargetEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    typed: HashMap<TargetEventKind, Vec<(SubscriberId, Callback)>>,
    catch_all: Vec<(SubscriberId, Callback)>,
}

/// Multiplexes target events to subscribers
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one event kind
    pub fn subscribe<F>(&self, kind: TargetEventKind, callback: F) -> SubscriberId
    where
        F: Fn(&TargetEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner
            .typed
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Subscribes to every event kind
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&TargetEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.catch_all.push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscriber; returns whether it was found
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.inner.lock();
        for list in inner.typed.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            if list.len() != before {
                return true;
            }
        }
        let before = inner.catch_all.len();
        inner.catch_all.retain(|(sid, _)| *sid != id);
        inner.catch_all.len() != before
    }

    /// Delivers an event to subscribers
    ///
    /// Callback lists are snapshotted so subscribers run without the
    /// bus lock and may re-subscribe from inside a callback.
    pub fn emit(&self, event: &TargetEvent) {
        let (typed, catch_all) = {
            let inner = self.inner.lock();
            let typed: Vec<Callback> = inner
                .typed
                .get(&event.kind)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            let catch_all: Vec<Callback> =
                inner.catch_all.iter().map(|(_, cb)| cb.clone()).collect();
            (typed, catch_all)
        };

        for callback in typed.iter().chain(catch_all.iter()) {
            callback(event);
        }
    }
}
