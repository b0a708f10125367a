//! Break-event store
//!
//! The declarative registry of user break events. It may be supplied by
//! the embedder and shared with other components, or auto-created by
//! the session on first access. Edits raise store events which the
//! session consumes and translates into engine calls.

use parking_lot::Mutex;
use std::sync::Arc;

use tether_common::{BreakEvent, BreakEventId};

/// A change to the store's contents
#[derive(Clone)]
pub enum StoreEvent {
    Added(Arc<BreakEvent>),
    Removed(Arc<BreakEvent>),
    /// Kind data of the event was edited
    Modified(Arc<BreakEvent>),
    EnableChanged(Arc<BreakEvent>),
    /// Session-side status changed (binding, validity, hit count)
    StatusChanged(Arc<BreakEvent>),
}

impl StoreEvent {
    pub fn break_event(&self) -> &Arc<BreakEvent> {
        match self {
            StoreEvent::Added(be)
            | StoreEvent::Removed(be)
            | StoreEvent::Modified(be)
            | StoreEvent::EnableChanged(be)
            | StoreEvent::StatusChanged(be) => be,
        }
    }
}

/// Identifier returned by [`BreakEventStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSubscriberId(u64);

type StoreCallback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    events: Vec<Arc<BreakEvent>>,
    subscribers: Vec<(StoreSubscriberId, StoreCallback)>,
}

/// Shared, observable collection of break events
#[derive(Default)]
pub struct BreakEventStore {
    inner: Mutex<StoreInner>,
    /// Installed by the session; consulted by UI-side read-only checks
    read_only_check: Mutex<Option<Box<dyn Fn() -> bool + Send + Sync>>>,
}

impl BreakEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a break event, returning the shared instance
    pub fn add(&self, event: BreakEvent) -> Arc<BreakEvent> {
        let event = Arc::new(event);
        self.add_shared(event.clone());
        event
    }

    /// Adds an already-shared break event
    pub fn add_shared(&self, event: Arc<BreakEvent>) {
        {
            let mut inner = self.inner.lock();
            inner.events.push(event.clone());
        }
        self.fire(&StoreEvent::Added(event));
    }

    /// Removes a break event by identity
    pub fn remove(&self, id: BreakEventId) -> Option<Arc<BreakEvent>> {
        let removed = {
            let mut inner = self.inner.lock();
            let index = inner.events.iter().position(|be| be.id() == id)?;
            Some(inner.events.remove(index))
        };
        if let Some(ref event) = removed {
            self.fire(&StoreEvent::Removed(event.clone()));
        }
        removed
    }

    /// Snapshot of the current break events
    pub fn events(&self) -> Vec<Arc<BreakEvent>> {
        self.inner.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    pub fn contains(&self, id: BreakEventId) -> bool {
        self.inner.lock().events.iter().any(|be| be.id() == id)
    }

    /// Flips the enabled flag and notifies subscribers
    pub fn set_enabled(&self, event: &Arc<BreakEvent>, enabled: bool) {
        if event.is_enabled() == enabled {
            return;
        }
        event.set_enabled(enabled);
        self.fire(&StoreEvent::EnableChanged(event.clone()));
    }

    /// Announces an edit of the event's kind data
    ///
    /// Callers mutate through [`BreakEvent::set_kind`] first, then
    /// notify so observers see the final data.
    pub fn notify_modified(&self, event: &Arc<BreakEvent>) {
        self.fire(&StoreEvent::Modified(event.clone()));
    }

    /// Entry point for the session to announce binding/status changes
    pub fn notify_status_changed(&self, event: &Arc<BreakEvent>) {
        self.fire(&StoreEvent::StatusChanged(event.clone()));
    }

    pub fn subscribe<F>(&self, callback: F) -> StoreSubscriberId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = StoreSubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: StoreSubscriberId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    /// Installs the read-only check consulted by [`Self::is_read_only`]
    pub fn install_read_only_check<F>(&self, check: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        *self.read_only_check.lock() = Some(Box::new(check));
    }

    pub fn clear_read_only_check(&self) {
        *self.read_only_check.lock() = None;
    }

    /// Whether break events may currently be edited
    ///
    /// Called from UI timers; the installed check must answer within a
    /// bounded wait and never block on engine work.
    pub fn is_read_only(&self) -> bool {
        match &*self.read_only_check.lock() {
            Some(check) => check(),
            None => false,
        }
    }

    /// Delivers outside the store lock so handlers may call back in
    fn fire(&self, event: &StoreEvent) {
        let subscribers: Vec<StoreCallback> = {
            let inner = self.inner.lock();
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in subscribers {
            callback(event);
        }
    }
}
