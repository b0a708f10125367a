//! Abstract engine interface
//!
//! These traits define the boundary between the session front-end and a
//! concrete debugging backend (native, managed runtime, remote
//! protocol). Backends are interchangeable trait objects; the session
//! never knows which one it is driving.

use tether_common::{
    AssemblyLine, Backtrace, BreakEvent, EventHandle, ProcessInfo, Result, StartInfo, ThreadInfo,
};

use crate::session::SessionNotifier;

/// A concrete debugging backend
///
/// Implementations are internally synchronized: every entry point takes
/// `&self`, may be called from the dispatcher worker, UI threads and
/// session callbacks alike, and may block arbitrarily. The session
/// guarantees the session lock is not held across execution-control
/// calls. Asynchronous notifications travel back through the
/// [`SessionNotifier`] handed to [`Engine::on_run`] /
/// [`Engine::on_attach`], from any thread the backend chooses.
///
/// Break-event contract: when the backend reports a source file as
/// unloaded it must drop the bindings for that file itself. The session
/// forgets the handles without calling back into the engine, and a
/// later reload mints fresh handles via
/// [`Engine::on_insert_break_event`]. Break-event entry points run
/// under the session lock and must not synchronously raise target
/// events; output and status notifications are fine.
pub trait Engine: Send + Sync {
    // --- Lifecycle ---

    /// Launches the target described by `start`
    fn on_run(&self, start: &StartInfo, notifier: SessionNotifier) -> Result<()>;

    /// Attaches to a running process
    fn on_attach(&self, process_id: u32, notifier: SessionNotifier) -> Result<()>;

    /// Detaches, leaving the target running
    fn on_detach(&self) -> Result<()>;

    /// Terminates the target
    fn on_exit(&self) -> Result<()>;

    /// Requests an interrupt of the running target
    ///
    /// Backends may ignore this when the target is not running.
    fn on_stop(&self) -> Result<()>;

    // --- Execution control ---

    fn on_continue(&self) -> Result<()>;
    fn on_step_line(&self) -> Result<()>;
    fn on_next_line(&self) -> Result<()>;
    fn on_step_instruction(&self) -> Result<()>;
    fn on_next_instruction(&self) -> Result<()>;

    /// Runs until the current frame returns
    fn on_finish(&self) -> Result<()>;

    fn on_set_active_thread(&self, pid: u32, tid: u32) -> Result<()>;

    // --- Break events ---

    /// Installs a break event, returning the backend handle for it
    fn on_insert_break_event(&self, be: &BreakEvent, activate: bool) -> Result<EventHandle>;

    fn on_remove_break_event(&self, handle: EventHandle) -> Result<()>;

    /// Re-applies edited break-event data; the backend may return a new
    /// handle if it had to re-install
    fn on_update_break_event(&self, handle: EventHandle, be: &BreakEvent) -> Result<EventHandle>;

    fn on_enable_break_event(&self, handle: EventHandle, enabled: bool) -> Result<()>;

    /// Whether break events may currently be changed
    fn allow_break_event_changes(&self) -> bool {
        true
    }

    // --- Introspection ---

    fn on_get_processes(&self) -> Result<Vec<ProcessInfo>>;
    fn on_get_threads(&self, pid: u32) -> Result<Vec<ThreadInfo>>;
    fn on_get_thread_backtrace(&self, pid: u32, tid: u32) -> Result<Backtrace>;

    /// Disassembles a source file; `None` when the backend cannot
    fn on_disassemble_file(&self, path: &str) -> Result<Option<Vec<AssemblyLine>>>;

    // --- Evaluation ---

    /// Resolves an expression in the context of a source location
    fn on_resolve_expression(&self, expression: &str, location: &str) -> Result<String>;

    /// Aborts evaluations still pending in the backend
    fn on_cancel_async_evaluations(&self) {}

    /// Whether `on_cancel_async_evaluations` does anything
    fn can_cancel_async_evaluations(&self) -> bool {
        false
    }
}
