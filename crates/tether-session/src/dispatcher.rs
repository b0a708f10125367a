//! Serialized command execution
//!
//! Every mutating session operation funnels through a dispatcher.
//! With an operation thread, submitted actions are queued and the
//! caller returns immediately; without one, the action runs inline on
//! the caller. Either way, actions submitted from one thread execute in
//! that thread's program order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    tx: mpsc::Sender<Action>,
    handle: Option<JoinHandle<()>>,
}

/// Serializes session operations, optionally on a worker thread
pub struct Dispatcher {
    worker: Option<Worker>,
}

impl Dispatcher {
    /// `use_operation_thread` decides whether actions run on a
    /// dedicated worker or inline on the caller
    pub fn new(use_operation_thread: bool) -> Self {
        let worker = if use_operation_thread {
            let (tx, rx) = mpsc::channel::<Action>();
            let spawned = thread::Builder::new()
                .name("tether-session-op".to_string())
                .spawn(move || {
                    while let Ok(action) = rx.recv() {
                        // A panicking action must not take the worker
                        // down with it; later actions still run.
                        if catch_unwind(AssertUnwindSafe(action)).is_err() {
                            tracing::error!(
                                target: "tether_session::dispatcher",
                                "session operation panicked"
                            );
                        }
                    }
                });
            match spawned {
                Ok(handle) => Some(Worker {
                    tx,
                    handle: Some(handle),
                }),
                Err(err) => {
                    tracing::warn!(
                        target: "tether_session::dispatcher",
                        error = %err,
                        "could not spawn operation thread, running actions inline"
                    );
                    None
                }
            }
        } else {
            None
        };
        Self { worker }
    }

    /// Whether actions run on the operation thread
    pub fn uses_operation_thread(&self) -> bool {
        self.worker.is_some()
    }

    /// Submits an action; runs inline when there is no worker or the
    /// worker is already shut down
    pub fn dispatch(&self, action: Action) {
        match &self.worker {
            Some(worker) => {
                if let Err(mpsc::SendError(action)) = worker.tx.send(action) {
                    action();
                }
            }
            None => action(),
        }
    }

    /// Stops the worker after draining queued actions; idempotent
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            drop(worker.tx);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_mode_runs_on_caller() {
        let dispatcher = Dispatcher::new(false);
        assert!(!dispatcher.uses_operation_thread());

        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let r = ran_on.clone();
        dispatcher.dispatch(Box::new(move || {
            *r.lock() = Some(thread::current().id());
        }));
        assert_eq!(*ran_on.lock(), Some(caller));
    }

    #[test]
    fn test_worker_preserves_program_order() {
        let mut dispatcher = Dispatcher::new(true);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let o = order.clone();
            dispatcher.dispatch(Box::new(move || o.lock().push(i)));
        }
        dispatcher.shutdown();
        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_survives_panicking_action() {
        let mut dispatcher = Dispatcher::new(true);
        let ran = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch(Box::new(|| panic!("boom")));
        let r = ran.clone();
        dispatcher.dispatch(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_drains_queue_and_is_idempotent() {
        let mut dispatcher = Dispatcher::new(true);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let r = ran.clone();
            dispatcher.dispatch(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }));
        }
        dispatcher.shutdown();
        dispatcher.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_dispatch_after_shutdown_runs_inline() {
        let mut dispatcher = Dispatcher::new(true);
        dispatcher.shutdown();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        dispatcher.dispatch(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
