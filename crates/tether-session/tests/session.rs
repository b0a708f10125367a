//! End-to-end session tests driven by a scripted engine
//!
//! The mock engine records every entry point it sees and can be
//! scripted to fail inserts, fail stepping, block inside an insert or
//! post a stop event from inside a step, which is enough to exercise
//! the full command/event lifecycle without a real backend.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tether_common::{
    AssemblyLine, Backtrace, BreakEvent, Breakpoint, BusyState, Error, EventHandle,
    FileCasePolicy, ProcessInfo, Result, SessionOptions, StackFrame, StartInfo, TargetEvent,
    TargetEventKind, ThreadInfo,
};
use tether_session::{
    BreakEventStore, Engine, Session, SessionConfig, SessionNotifier, SessionState, StoreEvent,
};

/// Shared scripting state of the mock engine, kept by the test while
/// the engine itself is owned by the session
struct MockState {
    calls: Mutex<Vec<String>>,
    notifier: Mutex<Option<SessionNotifier>>,
    next_handle: AtomicU64,
    /// Fail this many upcoming inserts with "unknown line"
    insert_failures: AtomicUsize,
    /// Fail the next step_line call
    step_failure: AtomicBool,
    /// Post TargetStopped from inside on_step_line
    auto_stop_on_step: AtomicBool,
    /// Block inside on_insert_break_event until the sender fires
    insert_gate: Mutex<Option<Receiver<()>>>,
    process_queries: AtomicUsize,
}

impl MockState {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            notifier: Mutex::new(None),
            next_handle: AtomicU64::new(0),
            insert_failures: AtomicUsize::new(0),
            step_failure: AtomicBool::new(false),
            auto_stop_on_step: AtomicBool::new(false),
            insert_gate: Mutex::new(None),
            process_queries: AtomicUsize::new(0),
        }
    }

    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn notifier(&self) -> SessionNotifier {
        self.notifier
            .lock()
            .unwrap()
            .clone()
            .expect("engine was not started")
    }

    fn gate_inserts(&self) -> Sender<()> {
        let (tx, rx) = channel();
        *self.insert_gate.lock().unwrap() = Some(rx);
        tx
    }

    fn open_gate(&self) {
        *self.insert_gate.lock().unwrap() = None;
    }
}

/// Engine double driven by a shared [`MockState`]
struct MockEngine {
    state: Arc<MockState>,
}

impl Engine for MockEngine {
    fn on_run(&self, start: &StartInfo, notifier: SessionNotifier) -> Result<()> {
        self.state.push(format!("on_run {}", start.executable));
        *self.state.notifier.lock().unwrap() = Some(notifier);
        Ok(())
    }

    fn on_attach(&self, process_id: u32, notifier: SessionNotifier) -> Result<()> {
        self.state.push(format!("on_attach {}", process_id));
        *self.state.notifier.lock().unwrap() = Some(notifier);
        Ok(())
    }

    fn on_detach(&self) -> Result<()> {
        self.state.push("on_detach");
        Ok(())
    }

    fn on_exit(&self) -> Result<()> {
        self.state.push("on_exit");
        Ok(())
    }

    fn on_stop(&self) -> Result<()> {
        self.state.push("on_stop");
        Ok(())
    }

    fn on_continue(&self) -> Result<()> {
        self.state.push("on_continue");
        Ok(())
    }

    fn on_step_line(&self) -> Result<()> {
        self.state.push("on_step_line");
        if self.state.step_failure.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal("target vanished".to_string()));
        }
        if self.state.auto_stop_on_step.load(Ordering::SeqCst) {
            self.state
                .notifier()
                .notify_target_event(TargetEvent::new(TargetEventKind::TargetStopped));
        }
        Ok(())
    }

    fn on_next_line(&self) -> Result<()> {
        self.state.push("on_next_line");
        Ok(())
    }

    fn on_step_instruction(&self) -> Result<()> {
        self.state.push("on_step_instruction");
        Ok(())
    }

    fn on_next_instruction(&self) -> Result<()> {
        self.state.push("on_next_instruction");
        Ok(())
    }

    fn on_finish(&self) -> Result<()> {
        self.state.push("on_finish");
        Ok(())
    }

    fn on_set_active_thread(&self, pid: u32, tid: u32) -> Result<()> {
        self.state.push(format!("on_set_active_thread {} {}", pid, tid));
        Ok(())
    }

    fn on_insert_break_event(&self, be: &BreakEvent, _activate: bool) -> Result<EventHandle> {
        self.state
            .push(format!("on_insert {}", be.location_display()));
        {
            let gate = self.state.insert_gate.lock().unwrap();
            if let Some(rx) = &*gate {
                let _ = rx.recv();
            }
        }
        let failures = self.state.insert_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.state
                .insert_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(Error::Internal("unknown line".to_string()));
        }
        Ok(EventHandle(
            self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    fn on_remove_break_event(&self, handle: EventHandle) -> Result<()> {
        self.state.push(format!("on_remove {}", handle.0));
        Ok(())
    }

    fn on_update_break_event(&self, handle: EventHandle, _be: &BreakEvent) -> Result<EventHandle> {
        self.state.push(format!("on_update {}", handle.0));
        Ok(handle)
    }

    fn on_enable_break_event(&self, handle: EventHandle, enabled: bool) -> Result<()> {
        self.state
            .push(format!("on_enable {} {}", handle.0, enabled));
        Ok(())
    }

    fn on_get_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.state.process_queries.fetch_add(1, Ordering::SeqCst);
        self.state.push("on_get_processes");
        Ok(vec![ProcessInfo::new(7, "app")])
    }

    fn on_get_threads(&self, pid: u32) -> Result<Vec<ThreadInfo>> {
        self.state.push(format!("on_get_threads {}", pid));
        Ok(vec![ThreadInfo::new(pid, 1).with_location("main.cs:42")])
    }

    fn on_get_thread_backtrace(&self, pid: u32, tid: u32) -> Result<Backtrace> {
        self.state
            .push(format!("on_get_thread_backtrace {} {}", pid, tid));
        Ok(Backtrace::new(vec![StackFrame {
            index: 0,
            address: 0x1000,
            symbol: Some("Main".to_string()),
            source_file: Some("main.cs".to_string()),
            line: Some(42),
        }]))
    }

    fn on_disassemble_file(&self, path: &str) -> Result<Option<Vec<AssemblyLine>>> {
        self.state.push(format!("on_disassemble_file {}", path));
        Ok(None)
    }

    fn on_resolve_expression(&self, expression: &str, location: &str) -> Result<String> {
        self.state
            .push(format!("on_resolve {} @ {}", expression, location));
        Ok(format!("resolved:{}", expression))
    }
}

/// Engine double whose launch always fails
struct FailingRunEngine {
    inner: MockEngine,
}

impl Engine for FailingRunEngine {
    fn on_run(&self, _: &StartInfo, _: SessionNotifier) -> Result<()> {
        Err(Error::Internal("no such binary".to_string()))
    }
    fn on_attach(&self, p: u32, n: SessionNotifier) -> Result<()> {
        self.inner.on_attach(p, n)
    }
    fn on_detach(&self) -> Result<()> {
        self.inner.on_detach()
    }
    fn on_exit(&self) -> Result<()> {
        self.inner.on_exit()
    }
    fn on_stop(&self) -> Result<()> {
        self.inner.on_stop()
    }
    fn on_continue(&self) -> Result<()> {
        self.inner.on_continue()
    }
    fn on_step_line(&self) -> Result<()> {
        self.inner.on_step_line()
    }
    fn on_next_line(&self) -> Result<()> {
        self.inner.on_next_line()
    }
    fn on_step_instruction(&self) -> Result<()> {
        self.inner.on_step_instruction()
    }
    fn on_next_instruction(&self) -> Result<()> {
        self.inner.on_next_instruction()
    }
    fn on_finish(&self) -> Result<()> {
        self.inner.on_finish()
    }
    fn on_set_active_thread(&self, p: u32, t: u32) -> Result<()> {
        self.inner.on_set_active_thread(p, t)
    }
    fn on_insert_break_event(&self, be: &BreakEvent, a: bool) -> Result<EventHandle> {
        self.inner.on_insert_break_event(be, a)
    }
    fn on_remove_break_event(&self, h: EventHandle) -> Result<()> {
        self.inner.on_remove_break_event(h)
    }
    fn on_update_break_event(&self, h: EventHandle, be: &BreakEvent) -> Result<EventHandle> {
        self.inner.on_update_break_event(h, be)
    }
    fn on_enable_break_event(&self, h: EventHandle, e: bool) -> Result<()> {
        self.inner.on_enable_break_event(h, e)
    }
    fn on_get_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.inner.on_get_processes()
    }
    fn on_get_threads(&self, p: u32) -> Result<Vec<ThreadInfo>> {
        self.inner.on_get_threads(p)
    }
    fn on_get_thread_backtrace(&self, p: u32, t: u32) -> Result<Backtrace> {
        self.inner.on_get_thread_backtrace(p, t)
    }
    fn on_disassemble_file(&self, p: &str) -> Result<Option<Vec<AssemblyLine>>> {
        self.inner.on_disassemble_file(p)
    }
    fn on_resolve_expression(&self, e: &str, l: &str) -> Result<String> {
        self.inner.on_resolve_expression(e, l)
    }
}

fn sensitive_options() -> SessionOptions {
    SessionOptions {
        file_case_policy: FileCasePolicy::Sensitive,
        ..SessionOptions::default()
    }
}

fn new_session(config: SessionConfig) -> (Session, Arc<MockState>) {
    let state = Arc::new(MockState::new());
    let engine = MockEngine {
        state: state.clone(),
    };
    let session = Session::with_options(Box::new(engine), config, sensitive_options());
    (session, state)
}

/// Runs the session to its first stop
fn start_stopped(session: &Session, engine: &Arc<MockState>) {
    session.run(&StartInfo::new("/bin/app")).unwrap();
    let notifier = engine.notifier();
    notifier.notify_target_event(TargetEvent::new(TargetEventKind::TargetReady));
    notifier.notify_target_event(TargetEvent::new(TargetEventKind::TargetStopped));
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.is_started());
}

fn bp(file: &str, line: u32) -> BreakEvent {
    BreakEvent::breakpoint(Breakpoint::new(file, line))
}

// --- Scenario: stepping ---

#[test]
fn test_step_line_sequence() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    // Prime the process cache so we can observe it clearing.
    session.get_processes().unwrap();
    assert_eq!(engine.process_queries.load(Ordering::SeqCst), 1);

    let e = engine.clone();
    session.on_target_started(move || e.push("signal target_started"));
    let e = engine.clone();
    session
        .bus()
        .subscribe(TargetEventKind::TargetStopped, move |_| {
            e.push("event target_stopped")
        });

    engine.auto_stop_on_step.store(true, Ordering::SeqCst);
    engine.clear_calls();
    session.step_line().unwrap();

    assert_eq!(
        engine.calls(),
        vec![
            "signal target_started",
            "on_step_line",
            "event target_stopped"
        ]
    );
    assert_eq!(session.state(), SessionState::Stopped);

    // The stop event invalidated the cached process list.
    session.get_processes().unwrap();
    assert_eq!(engine.process_queries.load(Ordering::SeqCst), 2);
}

// --- Scenario: insert failure ---

#[test]
fn test_insert_failure_is_recovered() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let l = log.clone();
    let (session, engine) = new_session(
        SessionConfig::new()
            .inline_dispatch()
            .with_log_writer(move |_, text| l.lock().unwrap().push(text.to_string())),
    );
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let status_changes = Arc::new(AtomicUsize::new(0));
    let s = status_changes.clone();
    store.subscribe(move |event| {
        if matches!(event, StoreEvent::StatusChanged(_)) {
            s.fetch_add(1, Ordering::SeqCst);
        }
    });

    engine.insert_failures.store(1, Ordering::SeqCst);
    let event = store.add(bp("foo.cs", 42));

    let info = session.break_event_info(event.id()).unwrap();
    assert!(info.handle.is_none());
    assert!(info.is_valid);
    assert_eq!(status_changes.load(Ordering::SeqCst), 1);
    assert_eq!(
        session.break_event_status(event.id()),
        "will not currently be hit"
    );

    let log = log.lock().unwrap();
    assert!(
        log.iter()
            .any(|line| line.contains("Could not set breakpoint at location 'foo.cs:42'")),
        "missing bind failure log line: {:?}",
        *log
    );
}

// --- Scenario: source reload ---

#[test]
fn test_source_reload_rebinds_breakpoint() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    engine.insert_failures.store(1, Ordering::SeqCst);
    let event = store.add(bp("/abs/foo.cs", 10));
    assert!(session.break_event_info(event.id()).unwrap().handle.is_none());

    let status_changes = Arc::new(AtomicUsize::new(0));
    let s = status_changes.clone();
    store.subscribe(move |e| {
        if matches!(e, StoreEvent::StatusChanged(_)) {
            s.fetch_add(1, Ordering::SeqCst);
        }
    });

    engine.clear_calls();
    engine.notifier().notify_source_file_loaded("/abs/foo.cs");

    assert_eq!(engine.count("on_insert"), 1);
    assert_eq!(status_changes.load(Ordering::SeqCst), 1);
    let info = session.break_event_info(event.id()).unwrap();
    assert!(info.handle.is_some());
    assert_eq!(session.break_event_status(event.id()), "ok");
}

// --- Scenario: store swap under a running session ---

#[test]
fn test_store_swap_rebinds_engine_state() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let status_changes = Arc::new(AtomicUsize::new(0));

    let first = session.break_event_store();
    let s = status_changes.clone();
    first.subscribe(move |event| {
        if matches!(event, StoreEvent::StatusChanged(_)) {
            s.fetch_add(1, Ordering::SeqCst);
        }
    });
    first.add(bp("a.cs", 1));
    first.add(bp("b.cs", 2));
    assert!(session.owns_store());

    let second = Arc::new(BreakEventStore::new());
    second.add(bp("c.cs", 3));
    let s = status_changes.clone();
    second.subscribe(move |event| {
        if matches!(event, StoreEvent::StatusChanged(_)) {
            s.fetch_add(1, Ordering::SeqCst);
        }
    });

    engine.clear_calls();
    status_changes.store(0, Ordering::SeqCst);
    session.set_break_event_store(Some(second.clone()));

    assert_eq!(engine.count("on_remove"), 2);
    assert_eq!(engine.count("on_insert"), 1);
    assert_eq!(status_changes.load(Ordering::SeqCst), 3);
    assert!(!session.owns_store());

    // The new store's breakpoint is bound.
    let c = second.events()[0].clone();
    assert!(session.break_event_info(c.id()).unwrap().handle.is_some());

    // Edits to the replaced store no longer reach the engine.
    engine.clear_calls();
    first.add(bp("d.cs", 4));
    assert_eq!(engine.count("on_insert"), 0);
}

// --- Scenario: read-only check under a blocking engine call ---

#[test]
fn test_read_only_check_times_out_quickly() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    assert!(!store.is_read_only());

    let gate = engine.gate_inserts();
    let blocked_store = store.clone();
    let blocker = std::thread::spawn(move || {
        // Holds the session lock inside the store-driven insert until
        // the gate opens.
        blocked_store.add(bp("slow.cs", 1));
    });

    // Wait until the blocked insert has reached the engine.
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.count("on_insert") == 0 {
        assert!(Instant::now() < deadline, "insert never started");
        std::thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    assert!(store.is_read_only());
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "read-only check blocked for {:?}",
        started.elapsed()
    );

    gate.send(()).unwrap();
    blocker.join().unwrap();
    engine.open_gate();
    assert!(!store.is_read_only());
}

// --- Scenario: engine failure while stepping ---

#[test]
fn test_step_failure_forces_stopped_state() {
    let handled = Arc::new(AtomicUsize::new(0));
    let h = handled.clone();
    let (session, engine) = new_session(
        SessionConfig::new()
            .inline_dispatch()
            .with_exception_handler(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                true
            }),
    );
    start_stopped(&session, &engine);

    let stops = Arc::new(AtomicUsize::new(0));
    let s = stops.clone();
    session
        .bus()
        .subscribe(TargetEventKind::TargetStopped, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

    engine.step_failure.store(true, Ordering::SeqCst);
    session.step_line().unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1, "synthesized stop expected");
    assert_eq!(session.state(), SessionState::Stopped);

    // The session recovered; continuing is accepted again.
    session.continue_().unwrap();
    assert_eq!(engine.count("on_continue"), 1);
}

// --- Run failure forces Exited ---

#[test]
fn test_run_failure_forces_exited_state() {
    let state = Arc::new(MockState::new());
    let engine = FailingRunEngine {
        inner: MockEngine {
            state: state.clone(),
        },
    };
    let session = Session::with_options(
        Box::new(engine),
        SessionConfig::new().inline_dispatch(),
        sensitive_options(),
    );

    session.run(&StartInfo::new("/bin/app")).unwrap();
    assert_eq!(session.state(), SessionState::Exited);
    // Exited is terminal: nothing is accepted any more.
    assert!(session.continue_().is_err());
    assert!(session.run(&StartInfo::new("/bin/app")).is_err());
}

// --- State gating ---

#[test]
fn test_command_gating_by_state() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());

    // Idle rejects movement, stop is a silent no-op.
    assert!(matches!(
        session.continue_(),
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(session.step_line(), Err(Error::InvalidState { .. })));
    session.stop().unwrap();
    assert_eq!(engine.count("on_stop"), 0);

    session.run(&StartInfo::new("/bin/app")).unwrap();
    assert_eq!(session.state(), SessionState::Running);

    // Running rejects run and stepping, accepts stop.
    assert!(session.run(&StartInfo::new("/bin/app")).is_err());
    assert!(session.step_line().is_err());
    session.stop().unwrap();
    assert_eq!(engine.count("on_stop"), 1);

    engine
        .notifier()
        .notify_target_event(TargetEvent::new(TargetEventKind::TargetStopped));
    assert_eq!(session.state(), SessionState::Stopped);

    // Stopped rejects run/attach.
    assert!(session.run(&StartInfo::new("/bin/app")).is_err());
    assert!(session.attach(42).is_err());
}

#[test]
fn test_commands_reject_missing_arguments() {
    let (session, _engine) = new_session(SessionConfig::new().inline_dispatch());
    assert!(matches!(
        session.run(&StartInfo::new("")),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(session.attach(0), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_attach_and_detach() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());

    session.attach(1234).unwrap();
    assert!(session.is_attached());
    assert_eq!(engine.count("on_attach"), 1);

    session.detach().unwrap();
    assert!(!session.is_attached());
    assert_eq!(engine.count("on_detach"), 1);

    // Detaching again is rejected.
    assert!(session.detach().is_err());
}

// --- Deferred binding before start ---

#[test]
fn test_break_events_bind_on_target_ready() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());

    let store = session.break_event_store();
    let a = store.add(bp("a.cs", 1));
    let b = store.add(bp("b.cs", 2));
    assert_eq!(engine.count("on_insert"), 0);

    // Registered, not bound.
    assert!(session.break_event_info(a.id()).unwrap().handle.is_none());

    session.run(&StartInfo::new("/bin/app")).unwrap();
    engine
        .notifier()
        .notify_target_event(TargetEvent::new(TargetEventKind::TargetReady));

    assert_eq!(engine.count("on_insert"), 2);
    assert!(session.break_event_info(a.id()).unwrap().handle.is_some());
    assert!(session.break_event_info(b.id()).unwrap().handle.is_some());
}

// --- Round-trip laws ---

#[test]
fn test_insert_then_remove_round_trip() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(bp("a.cs", 1));
    store.remove(event.id());

    assert_eq!(engine.count("on_insert"), 1);
    assert_eq!(engine.count("on_remove"), 1);
    assert!(session.break_event_info(event.id()).is_none());
}

#[test]
fn test_disable_enable_round_trip() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(bp("a.cs", 1));
    engine.clear_calls();

    store.set_enabled(&event, false);
    store.set_enabled(&event, true);

    assert_eq!(engine.count("on_enable"), 2);
    assert_eq!(engine.count("on_insert"), 0);
    assert_eq!(engine.count("on_remove"), 0);
}

#[test]
fn test_unload_load_round_trip() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(bp("/abs/foo.cs", 10));
    let first = session.break_event_info(event.id()).unwrap().handle.unwrap();

    engine.notifier().notify_source_file_unloaded("/abs/foo.cs");
    assert!(session.break_event_info(event.id()).unwrap().handle.is_none());
    assert_eq!(
        session.break_event_status(event.id()),
        "will not currently be hit"
    );

    engine.notifier().notify_source_file_loaded("/abs/foo.cs");
    let second = session.break_event_info(event.id()).unwrap().handle.unwrap();
    assert_ne!(first, second);
}

// --- Process cache identity ---

#[test]
fn test_process_list_identity_until_target_event() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let first = session.get_processes().unwrap();
    let second = session.get_processes().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.process_queries.load(Ordering::SeqCst), 1);

    engine
        .notifier()
        .notify_target_event(TargetEvent::new(TargetEventKind::ThreadStarted));

    let third = session.get_processes().unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(engine.process_queries.load(Ordering::SeqCst), 2);
}

// --- Back-references on value objects ---

#[test]
fn test_process_and_thread_route_queries_through_session() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let processes = session.get_processes().unwrap();
    let threads = processes[0].threads().unwrap();
    assert_eq!(engine.count("on_get_threads"), 1);
    assert_eq!(threads[0].pid, 7);

    let backtrace = threads[0].backtrace().unwrap();
    assert_eq!(engine.count("on_get_thread_backtrace"), 1);
    assert_eq!(backtrace.frame_count(), 1);
}

// --- Resolver cache ---

#[test]
fn test_resolver_is_memoized_per_expression_and_location() {
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let r = resolver_calls.clone();
    let (session, _engine) = new_session(
        SessionConfig::new()
            .inline_dispatch()
            .with_type_resolver(move |identifier, _| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(Some(format!("Ns.{}", identifier)))
            }),
    );

    assert_eq!(session.resolve_expression("Foo", "a.cs:1"), "Ns.Foo");
    assert_eq!(session.resolve_expression("Foo", "a.cs:1"), "Ns.Foo");
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 1);

    assert_eq!(session.resolve_expression("Foo", "b.cs:9"), "Ns.Foo");
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_resolver_falls_back_to_engine() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    assert_eq!(session.resolve_expression("Foo", "a.cs:1"), "resolved:Foo");
    assert_eq!(session.resolve_expression("Foo", "a.cs:1"), "resolved:Foo");
    assert_eq!(engine.count("on_resolve"), 1);
}

// --- Breakpoint hits ---

#[test]
fn test_breakpoint_hit_updates_count_and_notifies_store() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(bp("a.cs", 1));
    let handle = session.break_event_info(event.id()).unwrap().handle.unwrap();

    let status_changes = Arc::new(AtomicUsize::new(0));
    let s = status_changes.clone();
    store.subscribe(move |e| {
        if matches!(e, StoreEvent::StatusChanged(_)) {
            s.fetch_add(1, Ordering::SeqCst);
        }
    });

    session.continue_().unwrap();
    engine.notifier().notify_target_event(
        TargetEvent::new(TargetEventKind::TargetHitBreakpoint).with_break_event_handle(handle),
    );

    assert_eq!(event.hit_count(), 1);
    assert_eq!(status_changes.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_trace_breakpoint_reports_value() {
    let traces = Arc::new(Mutex::new(Vec::new()));
    let t = traces.clone();
    let (session, engine) = new_session(
        SessionConfig::new()
            .inline_dispatch()
            .with_type_resolver(|expr, _| Ok(Some(format!("value-of({})", expr))))
            .with_breakpoint_trace_handler(move |_, text| {
                t.lock().unwrap().push(text.to_string())
            }),
    );
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(BreakEvent::breakpoint(
        Breakpoint::new("a.cs", 1).with_trace("x"),
    ));
    let handle = session.break_event_info(event.id()).unwrap().handle.unwrap();

    session.continue_().unwrap();
    engine.notifier().notify_target_event(
        TargetEvent::new(TargetEventKind::TargetHitBreakpoint)
            .with_thread(ThreadInfo::new(7, 1).with_location("a.cs:1"))
            .with_break_event_handle(handle),
    );

    assert_eq!(traces.lock().unwrap().as_slice(), ["value-of(x)"]);
    assert_eq!(event.last_trace_value().as_deref(), Some("value-of(x)"));
}

#[test]
fn test_custom_breakpoint_action_consults_handler() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let (session, engine) = new_session(
        SessionConfig::new()
            .inline_dispatch()
            .with_custom_hit_handler(move |action, be| {
                s.lock().unwrap().push((action.to_string(), be.id()));
                false
            }),
    );
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(bp("a.cs", 1));
    let handle = session.break_event_info(event.id()).unwrap().handle.unwrap();

    let stop = engine
        .notifier()
        .notify_custom_breakpoint_action("log-and-go", handle);
    assert!(!stop);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        [("log-and-go".to_string(), event.id())]
    );

    // Unknown handles default to stopping.
    assert!(engine
        .notifier()
        .notify_custom_breakpoint_action("x", EventHandle(999)));
}

// --- Output and busy state ---

#[test]
fn test_output_and_log_routing() {
    let output = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let (o, l) = (output.clone(), log.clone());
    let (session, engine) = new_session(
        SessionConfig::new()
            .inline_dispatch()
            .with_output_writer(move |is_stderr, text| {
                o.lock().unwrap().push((is_stderr, text.to_string()))
            })
            .with_log_writer(move |is_stderr, text| {
                l.lock().unwrap().push((is_stderr, text.to_string()))
            }),
    );
    start_stopped(&session, &engine);

    let notifier = engine.notifier();
    notifier.notify_target_output(false, "hello\n");
    notifier.notify_target_output(true, "oops\n");
    notifier.notify_debugger_output(false, "engine ready\n");

    assert_eq!(
        output.lock().unwrap().as_slice(),
        [(false, "hello\n".to_string()), (true, "oops\n".to_string())]
    );
    assert_eq!(
        log.lock().unwrap().as_slice(),
        [(false, "engine ready\n".to_string())]
    );
}

#[test]
fn test_busy_state_fans_out() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    session.on_busy_state_changed(move |state: &BusyState| {
        s.lock()
            .unwrap()
            .push((state.is_busy, state.description.clone()));
    });

    engine.notifier().set_busy_state(BusyState::busy("evaluating"));
    engine.notifier().set_busy_state(BusyState::idle());

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        [(true, "evaluating".to_string()), (false, String::new())]
    );
}

// --- Operation thread ---

#[test]
fn test_operation_thread_runs_commands_asynchronously() {
    let (session, engine) = new_session(SessionConfig::new());

    session.run(&StartInfo::new("/bin/app")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.count("on_run") == 0 {
        assert!(Instant::now() < deadline, "worker never ran the command");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(session.state(), SessionState::Running);

    session.dispose();
}

// --- Disposal ---

#[test]
fn test_dispose_is_idempotent_and_silences_commands() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());
    start_stopped(&session, &engine);

    let store = session.break_event_store();
    let event = store.add(bp("a.cs", 1));
    assert!(session.break_event_info(event.id()).is_some());

    session.dispose();
    session.dispose();

    engine.clear_calls();
    assert!(session.continue_().is_err());
    assert!(session.get_processes().is_err());
    assert!(session.break_event_info(event.id()).is_none());

    // Store edits no longer reach the engine.
    store.add(bp("b.cs", 2));
    assert_eq!(engine.count("on_insert"), 0);
}

#[test]
fn test_store_invariant_every_event_registered_after_start() {
    let (session, engine) = new_session(SessionConfig::new().inline_dispatch());

    let store = session.break_event_store();
    store.add(bp("a.cs", 1));
    store.add(bp("b.cs", 2));

    start_stopped(&session, &engine);
    store.add(bp("c.cs", 3));

    for event in store.events() {
        assert!(
            session.break_event_info(event.id()).is_some(),
            "break event {} missing from registry",
            event.location_display()
        );
    }
}
