//! Break-event registry
//!
//! Maps user break events to backend handles and tracks their binding
//! state. The session serializes all registry mutations under the
//! session lock; the map itself sits behind its own lock so status
//! lookups from UI threads never wait on engine calls.
//!
//! Engine failures never propagate out of the registry: they are
//! logged, routed to the exception hook and recorded as an unbound
//! entry, to be retried when the source file loads again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tether_common::{
    BreakEvent, BreakEventId, BreakEventKind, Error, EventHandle, FileCasePolicy,
};

use crate::engine::Engine;
use crate::store::BreakEventStore;

/// Session-private binding state of one break event
#[derive(Debug, Clone)]
pub struct BreakEventInfo {
    /// Backend handle; `None` before start, after a failed insert, or
    /// while the source is unloaded
    pub handle: Option<EventHandle>,
    /// The engine may mark an event invalid (line without code)
    pub is_valid: bool,
    /// Engine-supplied detail overriding the derived status
    pub status_message: Option<String>,
}

impl BreakEventInfo {
    fn new() -> Self {
        Self {
            handle: None,
            is_valid: true,
            status_message: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Status line shown to the user
    pub fn status_text(&self) -> String {
        if let Some(message) = &self.status_message {
            message.clone()
        } else if self.is_valid && self.handle.is_some() {
            "ok".to_string()
        } else {
            "will not currently be hit".to_string()
        }
    }
}

/// Callbacks the session supplies for each registry operation
///
/// The registry invokes them after map mutation; the session may defer
/// delivery until its own locks are released.
pub struct RegistryHooks<'a> {
    /// Break event whose binding state changed
    pub status_changed: &'a dyn Fn(&Arc<BreakEvent>),
    /// Exception-handler dispatch
    pub exception: &'a dyn Fn(&Error),
    /// Debugger-output log line `(is_stderr, text)`
    pub log: &'a dyn Fn(bool, &str),
}

struct Entry {
    event: Arc<BreakEvent>,
    info: BreakEventInfo,
}

/// Break-event to handle mapping plus binding logic
pub struct BreakEventRegistry {
    entries: Mutex<HashMap<BreakEventId, Entry>>,
    /// Set while the session itself edits the store in response to an
    /// engine-driven relocation, so store callbacks can ignore the echo
    adjusting: AtomicBool,
}

impl BreakEventRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            adjusting: AtomicBool::new(false),
        }
    }

    /// Registers a break event; binds it right away when the session
    /// has already started
    pub fn add(
        &self,
        event: &Arc<BreakEvent>,
        started: bool,
        engine: &dyn Engine,
        hooks: &RegistryHooks<'_>,
    ) {
        let already_bound = {
            let mut entries = self.entries.lock();
            entries
                .entry(event.id())
                .or_insert_with(|| Entry {
                    event: event.clone(),
                    info: BreakEventInfo::new(),
                })
                .info
                .is_bound()
        };
        if started && !already_bound {
            self.bind(event, engine, hooks, true);
        }
    }

    /// Drops a break event, removing the backend binding when present
    pub fn remove(&self, id: BreakEventId, engine: &dyn Engine, hooks: &RegistryHooks<'_>) {
        let removed = self.entries.lock().remove(&id);
        let Some(entry) = removed else { return };

        if let Some(handle) = entry.info.handle {
            if let Err(err) = engine.on_remove_break_event(handle) {
                // The entry is gone either way; the backend is left to
                // reclaim the stale handle.
                let err = Error::engine("on_remove_break_event", err);
                tracing::warn!(
                    target: "tether_session::registry",
                    event = entry.event.id().0,
                    error = %err,
                    "failed to remove break event from engine"
                );
                (hooks.log)(false, &err.to_string());
                (hooks.exception)(&err);
            }
        }
        (hooks.status_changed)(&entry.event);
    }

    /// Re-applies edited break-event data
    ///
    /// Bound events go through the engine update entry point and may be
    /// re-handled; unbound events get a fresh insert attempt. This is
    /// also the re-binding path used after a source file loads.
    pub fn update(&self, id: BreakEventId, engine: &dyn Engine, hooks: &RegistryHooks<'_>) {
        let (event, handle) = {
            let entries = self.entries.lock();
            let Some(entry) = entries.get(&id) else { return };
            (entry.event.clone(), entry.info.handle)
        };

        match handle {
            Some(old_handle) => match engine.on_update_break_event(old_handle, &event) {
                Ok(new_handle) => {
                    if new_handle != old_handle {
                        self.set_handle(id, Some(new_handle));
                        (hooks.status_changed)(&event);
                    }
                }
                Err(err) => {
                    let err = Error::engine("on_update_break_event", err);
                    (hooks.log)(false, &err.to_string());
                    (hooks.exception)(&err);
                }
            },
            None => self.bind(&event, engine, hooks, false),
        }
    }

    /// Propagates an enabled-flag flip to the engine
    pub fn update_enabled(
        &self,
        id: BreakEventId,
        enabled: bool,
        engine: &dyn Engine,
        hooks: &RegistryHooks<'_>,
    ) {
        let handle = {
            let entries = self.entries.lock();
            let Some(entry) = entries.get(&id) else { return };
            entry.info.handle
        };
        if let Some(handle) = handle {
            if let Err(err) = engine.on_enable_break_event(handle, enabled) {
                let err = Error::engine("on_enable_break_event", err);
                (hooks.log)(false, &err.to_string());
                (hooks.exception)(&err);
            }
        }
    }

    /// Engine-initiated validity/status update; notifies only on an
    /// actual change
    pub fn set_status(
        &self,
        id: BreakEventId,
        is_valid: bool,
        status_message: Option<String>,
        hooks: &RegistryHooks<'_>,
    ) {
        let changed_event = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&id) else { return };
            if entry.info.is_valid == is_valid && entry.info.status_message == status_message {
                None
            } else {
                entry.info.is_valid = is_valid;
                entry.info.status_message = status_message;
                Some(entry.event.clone())
            }
        };
        if let Some(event) = changed_event {
            (hooks.status_changed)(&event);
        }
    }

    /// Retries binding for breakpoints in `path` left unbound by a
    /// failed insert or an earlier unload
    pub fn source_file_loaded(
        &self,
        path: &str,
        policy: FileCasePolicy,
        engine: &dyn Engine,
        hooks: &RegistryHooks<'_>,
    ) {
        for id in self.unbound_in_file(path, policy) {
            self.update(id, engine, hooks);
        }
    }

    /// Forgets handles for breakpoints in `path`
    ///
    /// The engine is not called: by contract the backend dropped the
    /// bindings together with the source file.
    pub fn source_file_unloaded(
        &self,
        path: &str,
        policy: FileCasePolicy,
        hooks: &RegistryHooks<'_>,
    ) {
        let mut unbound = Vec::new();
        {
            let mut entries = self.entries.lock();
            for entry in entries.values_mut() {
                if entry.info.handle.is_none() {
                    continue;
                }
                if !Self::matches_file(&entry.event, path, policy) {
                    continue;
                }
                entry.info.handle = None;
                unbound.push(entry.event.clone());
            }
        }
        for event in unbound {
            tracing::debug!(
                target: "tether_session::registry",
                event = event.id().0,
                path,
                "break event unbound, source unloaded"
            );
            (hooks.status_changed)(&event);
        }
    }

    /// Moves a breakpoint to the line the engine actually bound
    ///
    /// The store edit this produces originated from the engine, not the
    /// user; the adjusting flag tells store callbacks to ignore it.
    pub fn adjust_location(
        &self,
        event: &Arc<BreakEvent>,
        new_line: u32,
        store: &BreakEventStore,
    ) {
        let Some(mut bp) = event.as_breakpoint() else { return };
        if bp.line == new_line {
            return;
        }
        bp.line = new_line;
        self.adjusting.store(true, Ordering::SeqCst);
        event.set_kind(BreakEventKind::Breakpoint(bp));
        store.notify_modified(event);
        self.adjusting.store(false, Ordering::SeqCst);
    }

    /// Whether the session itself is currently editing the store
    pub fn is_adjusting(&self) -> bool {
        self.adjusting.load(Ordering::SeqCst)
    }

    /// Unbinds and drops every entry (store replacement)
    pub fn remove_all(&self, engine: &dyn Engine, hooks: &RegistryHooks<'_>) {
        let drained: Vec<Entry> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            if let Some(handle) = entry.info.handle {
                if let Err(err) = engine.on_remove_break_event(handle) {
                    let err = Error::engine("on_remove_break_event", err);
                    (hooks.log)(false, &err.to_string());
                    (hooks.exception)(&err);
                }
            }
            (hooks.status_changed)(&entry.event);
        }
    }

    /// Drops every entry without touching the engine (dispose path)
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Binding state of a break event
    pub fn info(&self, id: BreakEventId) -> Option<BreakEventInfo> {
        self.entries.lock().get(&id).map(|entry| entry.info.clone())
    }

    /// Looks a break event up by its backend handle
    pub fn find_by_handle(&self, handle: EventHandle) -> Option<Arc<BreakEvent>> {
        self.entries
            .lock()
            .values()
            .find(|entry| entry.info.handle == Some(handle))
            .map(|entry| entry.event.clone())
    }

    pub fn contains(&self, id: BreakEventId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn set_handle(&self, id: BreakEventId, handle: Option<EventHandle>) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.info.handle = handle;
        }
    }

    fn matches_file(event: &BreakEvent, path: &str, policy: FileCasePolicy) -> bool {
        match event.kind() {
            BreakEventKind::Breakpoint(bp) => policy.paths_equal(&bp.file, path),
            BreakEventKind::Catchpoint(_) => false,
        }
    }

    /// Insert attempt; a failure is recorded as an unbound entry and
    /// reported without propagating
    fn bind(
        &self,
        event: &Arc<BreakEvent>,
        engine: &dyn Engine,
        hooks: &RegistryHooks<'_>,
        notify_on_failure: bool,
    ) {
        match engine.on_insert_break_event(event, event.is_enabled()) {
            Ok(handle) => {
                self.set_handle(event.id(), Some(handle));
                tracing::debug!(
                    target: "tether_session::registry",
                    event = event.id().0,
                    handle = handle.0,
                    "break event bound"
                );
                (hooks.status_changed)(event);
            }
            Err(err) => {
                let err = Error::BreakpointBind {
                    location: event.location_display(),
                    message: err.to_string(),
                };
                tracing::warn!(
                    target: "tether_session::registry",
                    event = event.id().0,
                    error = %err,
                    "break event bind failed"
                );
                (hooks.log)(false, &err.to_string());
                (hooks.exception)(&err);
                if notify_on_failure {
                    (hooks.status_changed)(event);
                }
            }
        }
    }

    fn unbound_in_file(&self, path: &str, policy: FileCasePolicy) -> Vec<BreakEventId> {
        let entries = self.entries.lock();
        entries
            .values()
            .filter(|entry| {
                entry.info.handle.is_none() && Self::matches_file(&entry.event, path, policy)
            })
            .map(|entry| entry.event.id())
            .collect()
    }
}

impl Default for BreakEventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
