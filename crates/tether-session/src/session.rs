//! Session façade
//!
//! The public coordination surface between a user interface and a
//! concrete debugging engine. Commands are serialized through the
//! dispatcher; asynchronous engine notifications arrive through a
//! [`SessionNotifier`] and fan out to the event bus.
//!
//! Lock layout: the session lock (`core`) guards state-machine flags,
//! the bound store, the active thread and the process cache; the
//! registry carries its own breakpoints lock; the output lock guards
//! the output and log writers. Execution-control engine calls run with
//! no session lock held; store-driven registry work runs under the
//! session lock, which is why the store read-only check uses a timed
//! acquisition.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tether_common::{
    AssemblyLine, Backtrace, BreakEvent, BreakEventId, BusyState, Error, EvaluationOptions,
    EventHandle, ProcessInfo, Result, SessionLink, SessionOptions, StackFrame, StartInfo,
    TargetEvent, TargetEventKind, ThreadInfo,
};

use crate::bus::EventBus;
use crate::dispatcher::Dispatcher;
use crate::engine::Engine;
use crate::registry::{BreakEventInfo, BreakEventRegistry, RegistryHooks};
use crate::resolver::{
    EvaluatorFactory, ExpressionEvaluator, ExpressionResolverCache, ResolverHook,
};
use crate::state::{SessionState, StateMachine, Transition};
use crate::store::{BreakEventStore, StoreEvent, StoreSubscriberId};

/// Bounded wait used by the store read-only check
const READ_ONLY_LOCK_WAIT: Duration = Duration::from_millis(10);

pub type ExceptionHandler = Arc<dyn Fn(&Error) -> bool + Send + Sync>;
pub type OutputWriter = Arc<dyn Fn(bool, &str) + Send + Sync>;
pub type TraceHandler = Arc<dyn Fn(&Arc<BreakEvent>, &str) + Send + Sync>;
pub type CustomHitHandler = Arc<dyn Fn(&str, &Arc<BreakEvent>) -> bool + Send + Sync>;
pub type StartedHandler = Arc<dyn Fn() + Send + Sync>;
pub type BusyHandler = Arc<dyn Fn(&BusyState) + Send + Sync>;

/// Identifier for target-started / busy-state handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Session configuration: dispatch mode plus the embedder hooks
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Run engine-blocking commands on a dedicated worker so public
    /// API calls return immediately
    pub use_operation_thread: bool,
    /// Receives every recovered error; returns whether it was handled
    pub exception_handler: Option<ExceptionHandler>,
    /// Receives trace values of tracing breakpoints
    pub breakpoint_trace_handler: Option<TraceHandler>,
    /// Resolves identifiers to fully qualified names
    pub type_resolver_handler: Option<ResolverHook>,
    /// Produces expression evaluators per file extension
    pub expression_evaluator_factory: Option<EvaluatorFactory>,
    /// Decides whether a custom break-event action stops the target
    pub custom_break_event_hit_handler: Option<CustomHitHandler>,
    /// Receives target stdout/stderr text
    pub output_writer: Option<OutputWriter>,
    /// Receives debugger diagnostic text
    pub log_writer: Option<OutputWriter>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            use_operation_thread: true,
            ..Default::default()
        }
    }

    /// Run commands inline on the caller instead of the worker
    pub fn inline_dispatch(mut self) -> Self {
        self.use_operation_thread = false;
        self
    }

    pub fn with_exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_breakpoint_trace_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<BreakEvent>, &str) + Send + Sync + 'static,
    {
        self.breakpoint_trace_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_type_resolver<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.type_resolver_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_evaluator_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<dyn ExpressionEvaluator>> + Send + Sync + 'static,
    {
        self.expression_evaluator_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_custom_hit_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Arc<BreakEvent>) -> bool + Send + Sync + 'static,
    {
        self.custom_break_event_hit_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_output_writer<F>(mut self, writer: F) -> Self
    where
        F: Fn(bool, &str) + Send + Sync + 'static,
    {
        self.output_writer = Some(Arc::new(writer));
        self
    }

    pub fn with_log_writer<F>(mut self, writer: F) -> Self
    where
        F: Fn(bool, &str) + Send + Sync + 'static,
    {
        self.log_writer = Some(Arc::new(writer));
        self
    }
}

/// Forced transition synthesized when a control command fails
#[derive(Debug, Clone, Copy)]
enum Forced {
    Stop,
    Exit,
}

/// Deferred side effects of a registry operation, delivered once the
/// session lock is released
#[derive(Default)]
struct RegistryOutcome {
    log_lines: Vec<(bool, String)>,
    errors: Vec<Error>,
    status_changed: Vec<Arc<BreakEvent>>,
}

struct OutputWriters {
    output: Option<OutputWriter>,
    log: Option<OutputWriter>,
}

struct SessionCore {
    machine: StateMachine,
    options: SessionOptions,
    store: Option<Arc<BreakEventStore>>,
    owned_store: bool,
    store_subscription: Option<StoreSubscriberId>,
    active_thread: Option<(u32, u32)>,
    /// Memoized until the next target event
    processes: Option<Arc<Vec<ProcessInfo>>>,
    started_handlers: Vec<(HandlerId, StartedHandler)>,
    busy_handlers: Vec<(HandlerId, BusyHandler)>,
    next_handler_id: u64,
}

impl SessionCore {
    fn new(options: SessionOptions) -> Self {
        Self {
            machine: StateMachine::new(),
            options,
            store: None,
            owned_store: false,
            store_subscription: None,
            active_thread: None,
            processes: None,
            started_handlers: Vec::new(),
            busy_handlers: Vec::new(),
            next_handler_id: 0,
        }
    }
}

struct SessionShared {
    /// The session lock
    core: Mutex<SessionCore>,
    registry: BreakEventRegistry,
    /// Internally synchronized backend; entry points never run under
    /// the session lock except store-driven break-event calls
    engine: Box<dyn Engine>,
    /// The output lock
    output: Mutex<OutputWriters>,
    bus: EventBus,
    resolver: ExpressionResolverCache,
    config: SessionConfig,
    weak_self: OnceLock<Weak<SessionShared>>,
}

/// The debugger session front-end
///
/// Owns the engine, the break-event registry and the dispatch of every
/// command. Dropping the session disposes it.
pub struct Session {
    shared: Arc<SessionShared>,
    dispatcher: Mutex<Dispatcher>,
}

/// Callback surface handed to engines
///
/// Cheap to clone; holds a weak back-reference so notifications from a
/// backend that outlives the session are silent no-ops. May be called
/// from any thread and never re-enters the dispatcher.
#[derive(Clone)]
pub struct SessionNotifier {
    shared: Weak<SessionShared>,
}

impl Session {
    pub fn new(engine: Box<dyn Engine>, config: SessionConfig) -> Self {
        Self::with_options(engine, config, SessionOptions::default())
    }

    pub fn with_options(
        engine: Box<dyn Engine>,
        config: SessionConfig,
        options: SessionOptions,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.use_operation_thread);
        let shared = Arc::new(SessionShared {
            core: Mutex::new(SessionCore::new(options)),
            registry: BreakEventRegistry::new(),
            engine,
            output: Mutex::new(OutputWriters {
                output: config.output_writer.clone(),
                log: config.log_writer.clone(),
            }),
            bus: EventBus::new(),
            resolver: ExpressionResolverCache::new(),
            config,
            weak_self: OnceLock::new(),
        });
        let _ = shared.weak_self.set(Arc::downgrade(&shared));
        Self {
            shared,
            dispatcher: Mutex::new(dispatcher),
        }
    }

    /// Notifier for engines constructed before `run`/`attach`
    pub fn notifier(&self) -> SessionNotifier {
        SessionNotifier {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// The target-event bus
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    // --- State queries ---

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().machine.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.core.lock().machine.is_running()
    }

    pub fn is_started(&self) -> bool {
        self.shared.core.lock().machine.is_started()
    }

    pub fn is_attached(&self) -> bool {
        self.shared.core.lock().machine.is_attached()
    }

    pub fn active_thread(&self) -> Option<(u32, u32)> {
        self.shared.core.lock().active_thread
    }

    // --- Options ---

    pub fn options(&self) -> SessionOptions {
        self.shared.core.lock().options.clone()
    }

    /// Replaces the options wholesale; rejected once the session has
    /// started
    pub fn set_options(&self, options: SessionOptions) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.machine.is_started() {
            return Err(Error::InvalidState {
                command: "set_options",
                state: core.machine.state().name(),
            });
        }
        core.options = options;
        Ok(())
    }

    /// Swaps the evaluation sub-options; allowed at any time
    pub fn set_evaluation_options(&self, evaluation: EvaluationOptions) {
        self.shared.core.lock().options.evaluation = evaluation;
    }

    // --- Output writers ---

    pub fn set_output_writer(&self, writer: Option<OutputWriter>) {
        self.shared.output.lock().output = writer;
    }

    pub fn set_log_writer(&self, writer: Option<OutputWriter>) {
        self.shared.output.lock().log = writer;
    }

    // --- Session-level subscriptions ---

    /// Called right before every command that (re)starts execution
    pub fn on_target_started<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut core = self.shared.core.lock();
        let id = HandlerId(core.next_handler_id);
        core.next_handler_id += 1;
        core.started_handlers.push((id, Arc::new(handler)));
        id
    }

    /// Called when the engine reports a busy-state change
    pub fn on_busy_state_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&BusyState) + Send + Sync + 'static,
    {
        let mut core = self.shared.core.lock();
        let id = HandlerId(core.next_handler_id);
        core.next_handler_id += 1;
        core.busy_handlers.push((id, Arc::new(handler)));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut core = self.shared.core.lock();
        let before = core.started_handlers.len() + core.busy_handlers.len();
        core.started_handlers.retain(|(hid, _)| *hid != id);
        core.busy_handlers.retain(|(hid, _)| *hid != id);
        core.started_handlers.len() + core.busy_handlers.len() != before
    }

    // --- Break-event store binding ---

    /// The bound store, auto-created (and then session-owned) on first
    /// access
    pub fn break_event_store(&self) -> Arc<BreakEventStore> {
        {
            let core = self.shared.core.lock();
            if let Some(store) = &core.store {
                return store.clone();
            }
        }
        let store = Arc::new(BreakEventStore::new());
        self.install_store(Some(store.clone()), true);
        store
    }

    /// Replaces the store: every bound break event is removed from the
    /// engine and the old subscription released; when the session has
    /// started, the new store's events are inserted. `None` leaves
    /// the session storeless. A session-owned store is released here.
    pub fn set_break_event_store(&self, store: Option<Arc<BreakEventStore>>) {
        self.install_store(store, false);
    }

    fn install_store(&self, store: Option<Arc<BreakEventStore>>, owned: bool) {
        let shared = &self.shared;

        let (old, outcome) = {
            let mut core = shared.core.lock();
            let old = core
                .store
                .take()
                .map(|s| (s, core.store_subscription.take()));
            let outcome = if old.is_some() {
                Self::registry_op(shared, |engine, hooks| {
                    shared.registry.remove_all(engine, hooks);
                })
            } else {
                RegistryOutcome::default()
            };
            (old, outcome)
        };
        if let Some((old_store, subscription)) = old {
            if let Some(subscription) = subscription {
                old_store.unsubscribe(subscription);
            }
            old_store.clear_read_only_check();
            // Removal notifications go to the old store's observers.
            Self::settle(shared, outcome, Some(&old_store));
        }

        let Some(store) = store else {
            let mut core = shared.core.lock();
            core.owned_store = false;
            return;
        };

        let weak = Arc::downgrade(shared);
        let subscription = store.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                Session::on_store_event(&shared, event);
            }
        });
        let weak = Arc::downgrade(shared);
        store.install_read_only_check(move || match weak.upgrade() {
            Some(shared) => Session::check_read_only(&shared),
            None => true,
        });

        let started = {
            let mut core = shared.core.lock();
            core.store = Some(store.clone());
            core.owned_store = owned;
            core.store_subscription = Some(subscription);
            core.machine.is_started()
        };

        if started {
            Self::insert_store_events(shared, &store);
        }
    }

    /// Whether the bound store was auto-created by (and so belongs to)
    /// the session
    pub fn owns_store(&self) -> bool {
        self.shared.core.lock().owned_store
    }

    /// Binding state of a break event, if the session knows it
    pub fn break_event_info(&self, id: BreakEventId) -> Option<BreakEventInfo> {
        self.shared.registry.info(id)
    }

    /// User-facing status line for a break event
    pub fn break_event_status(&self, id: BreakEventId) -> String {
        self.shared
            .registry
            .info(id)
            .map(|info| info.status_text())
            .unwrap_or_else(|| "will not currently be hit".to_string())
    }

    // --- Commands ---

    /// Launches the target. The session moves to Running; the engine
    /// reports readiness and stops through the notifier.
    pub fn run(&self, start: &StartInfo) -> Result<()> {
        if start.executable.is_empty() {
            return Err(Error::InvalidArgument("start_info.executable"));
        }
        self.precheck("run", &[SessionState::Idle])?;
        let start = start.clone();
        self.dispatch(move |shared| {
            Self::control_action(shared, "run", &[SessionState::Idle], Forced::Exit, |engine| {
                engine.on_run(&start, Self::make_notifier(shared))
            });
        });
        Ok(())
    }

    /// Attaches to a running process
    pub fn attach(&self, process_id: u32) -> Result<()> {
        if process_id == 0 {
            return Err(Error::InvalidArgument("process_id"));
        }
        self.precheck("attach", &[SessionState::Idle])?;
        self.dispatch(move |shared| {
            {
                let mut core = shared.core.lock();
                if core.machine.state() == SessionState::Idle {
                    core.machine.set_attached(true);
                }
            }
            Self::control_action(
                shared,
                "attach",
                &[SessionState::Idle],
                Forced::Exit,
                |engine| engine.on_attach(process_id, Self::make_notifier(shared)),
            );
        });
        Ok(())
    }

    /// Detaches, leaving the target running; only meaningful for
    /// attached sessions
    pub fn detach(&self) -> Result<()> {
        {
            let core = self.shared.core.lock();
            if core.machine.is_disposed() {
                return Ok(());
            }
            if !core.machine.is_attached() {
                return Err(Error::InvalidState {
                    command: "detach",
                    state: core.machine.state().name(),
                });
            }
        }
        self.dispatch(move |shared| match shared.engine.on_detach() {
            Ok(()) => shared.core.lock().machine.set_attached(false),
            Err(err) => {
                Self::dispatch_exception(shared, &err);
            }
        });
        Ok(())
    }

    pub fn continue_(&self) -> Result<()> {
        self.control_command("continue", &[SessionState::Stopped], Forced::Stop, |engine| {
            engine.on_continue()
        })
    }

    pub fn step_line(&self) -> Result<()> {
        self.control_command("step_line", &[SessionState::Stopped], Forced::Stop, |engine| {
            engine.on_step_line()
        })
    }

    pub fn next_line(&self) -> Result<()> {
        self.control_command("next_line", &[SessionState::Stopped], Forced::Stop, |engine| {
            engine.on_next_line()
        })
    }

    pub fn step_instruction(&self) -> Result<()> {
        self.control_command(
            "step_instruction",
            &[SessionState::Stopped],
            Forced::Stop,
            |engine| engine.on_step_instruction(),
        )
    }

    pub fn next_instruction(&self) -> Result<()> {
        self.control_command(
            "next_instruction",
            &[SessionState::Stopped],
            Forced::Stop,
            |engine| engine.on_next_instruction(),
        )
    }

    /// Runs until the current frame returns
    pub fn finish(&self) -> Result<()> {
        self.control_command("finish", &[SessionState::Stopped], Forced::Exit, |engine| {
            engine.on_finish()
        })
    }

    /// Interrupts the running target; a silent no-op in any other state
    pub fn stop(&self) -> Result<()> {
        {
            let core = self.shared.core.lock();
            if core.machine.is_disposed() || !core.machine.is_running() {
                return Ok(());
            }
        }
        self.dispatch(move |shared| {
            if !shared.core.lock().machine.is_running() {
                return;
            }
            if let Err(err) = shared.engine.on_stop() {
                Self::dispatch_exception(shared, &err);
            }
        });
        Ok(())
    }

    /// Terminates the target
    pub fn exit(&self) -> Result<()> {
        self.precheck("exit", &[SessionState::Running, SessionState::Stopped])?;
        self.dispatch(move |shared| {
            if let Err(err) = shared.engine.on_exit() {
                Self::recover(shared, err, Forced::Exit);
            }
        });
        Ok(())
    }

    pub fn set_active_thread(&self, pid: u32, tid: u32) -> Result<()> {
        self.precheck("set_active_thread", &[SessionState::Stopped])?;
        self.dispatch(move |shared| {
            shared.core.lock().active_thread = Some((pid, tid));
            if let Err(err) = shared.engine.on_set_active_thread(pid, tid) {
                Self::dispatch_exception(shared, &err);
            }
        });
        Ok(())
    }

    // --- Introspection ---

    /// Processes of the target, memoized until the next target event
    pub fn get_processes(&self) -> Result<Arc<Vec<ProcessInfo>>> {
        {
            let core = self.shared.core.lock();
            if core.machine.is_disposed() {
                return Err(Error::Disposed);
            }
            if let Some(cached) = &core.processes {
                return Ok(cached.clone());
            }
        }
        let processes = self.shared.engine.on_get_processes()?;
        let link = Self::link(&self.shared);
        for process in &processes {
            process.attach_session(link.clone());
        }
        let processes = Arc::new(processes);
        self.shared.core.lock().processes = Some(processes.clone());
        Ok(processes)
    }

    pub fn get_threads(&self, pid: u32) -> Result<Vec<ThreadInfo>> {
        SessionLink::threads(&*self.shared, pid)
    }

    pub fn get_backtrace(&self, pid: u32, tid: u32) -> Result<Backtrace> {
        SessionLink::backtrace(&*self.shared, pid, tid)
    }

    /// Disassembly of a source file; `None` when the engine cannot
    pub fn disassemble_file(&self, path: &str) -> Result<Option<Vec<AssemblyLine>>> {
        self.precheck("disassemble_file", &[SessionState::Stopped])?;
        self.shared.engine.on_disassemble_file(path)
    }

    // --- Evaluation ---

    /// Resolves an expression at a location, memoized per pair.
    /// Resolution failures are logged and the original expression
    /// comes back.
    pub fn resolve_expression(&self, expression: &str, location: &str) -> String {
        Self::resolve_on(&self.shared, expression, location)
    }

    /// Evaluator for a stack frame, selected by source file extension
    pub fn evaluator_for_frame(&self, frame: &StackFrame) -> Arc<dyn ExpressionEvaluator> {
        self.shared.resolver.evaluator_for_frame(
            frame,
            self.shared.config.expression_evaluator_factory.as_ref(),
        )
    }

    /// Fire-and-forget cancellation of backend evaluations
    pub fn cancel_async_evaluations(&self) {
        self.dispatch(move |shared| {
            if shared.engine.can_cancel_async_evaluations() {
                shared.engine.on_cancel_async_evaluations();
            }
        });
    }

    // --- Disposal ---

    /// Idempotent; commands become no-ops, the store subscription is
    /// released and the worker drained. A session-owned store dies with
    /// the session, a user-supplied one is left untouched.
    pub fn dispose(&self) {
        let store = {
            let mut core = self.shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            core.machine.dispose();
            core.store.take().map(|s| (s, core.store_subscription.take()))
        };
        if let Some((store, subscription)) = store {
            if let Some(subscription) = subscription {
                store.unsubscribe(subscription);
            }
            store.clear_read_only_check();
        }
        self.shared.registry.clear();
        self.dispatcher.lock().shutdown();
        tracing::debug!(target: "tether_session::session", "session disposed");
    }

    // --- Internals ---

    fn dispatch(&self, action: impl FnOnce(&Arc<SessionShared>) + Send + 'static) {
        let shared = self.shared.clone();
        self.dispatcher
            .lock()
            .dispatch(Box::new(move || action(&shared)));
    }

    /// Synchronous state gate run before a command is queued
    fn precheck(&self, command: &'static str, accepted: &[SessionState]) -> Result<()> {
        let core = self.shared.core.lock();
        if core.machine.is_disposed() {
            return Err(Error::Disposed);
        }
        core.machine.require(command, accepted)
    }

    fn control_command(
        &self,
        command: &'static str,
        accepted: &'static [SessionState],
        forced: Forced,
        call: fn(&dyn Engine) -> Result<()>,
    ) -> Result<()> {
        self.precheck(command, accepted)?;
        self.dispatch(move |shared| {
            Self::control_action(shared, command, accepted, forced, |engine| call(engine));
        });
        Ok(())
    }

    /// Shared body of every execution-control action: re-check the
    /// state under the session lock, take the running transition, raise
    /// target-started, then call the engine with no lock held.
    fn control_action(
        shared: &Arc<SessionShared>,
        command: &'static str,
        accepted: &[SessionState],
        forced: Forced,
        call: impl FnOnce(&dyn Engine) -> Result<()>,
    ) {
        let handlers = {
            let mut core = shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            if let Err(err) = core.machine.require(command, accepted) {
                drop(core);
                Self::dispatch_exception(shared, &err);
                return;
            }
            core.machine.on_running();
            core.started_handlers
                .iter()
                .map(|(_, h)| h.clone())
                .collect::<Vec<_>>()
        };
        for handler in handlers {
            handler();
        }

        if let Err(err) = call(shared.engine.as_ref()) {
            tracing::warn!(
                target: "tether_session::session",
                command,
                error = %err,
                "engine command failed, forcing coherent state"
            );
            Self::recover(shared, err, forced);
        }
    }

    /// Exception-handler dispatch plus forced-event synthesis, so
    /// observers always see a coherent transition after a failure
    fn recover(shared: &Arc<SessionShared>, err: Error, forced: Forced) {
        Self::dispatch_exception(shared, &err);
        let kind = match forced {
            Forced::Stop => TargetEventKind::TargetStopped,
            Forced::Exit => TargetEventKind::TargetExited,
        };
        Self::handle_target_event(shared, TargetEvent::new(kind));
    }

    fn dispatch_exception(shared: &Arc<SessionShared>, err: &Error) -> bool {
        if let Some(handler) = &shared.config.exception_handler {
            if handler(err) {
                return true;
            }
        }
        tracing::error!(
            target: "tether_session::session",
            error = %err,
            "unhandled session error"
        );
        false
    }

    fn make_notifier(shared: &Arc<SessionShared>) -> SessionNotifier {
        SessionNotifier {
            shared: Arc::downgrade(shared),
        }
    }

    fn weak(shared: &Arc<SessionShared>) -> Weak<SessionShared> {
        shared
            .weak_self
            .get()
            .cloned()
            .unwrap_or_else(Weak::new)
    }

    fn link(shared: &Arc<SessionShared>) -> Weak<dyn SessionLink> {
        let weak: Weak<dyn SessionLink> = Self::weak(shared);
        weak
    }

    /// Runs a registry operation, collecting its side effects for
    /// delivery after the caller's locks are released
    fn registry_op(
        shared: &Arc<SessionShared>,
        f: impl FnOnce(&dyn Engine, &RegistryHooks<'_>),
    ) -> RegistryOutcome {
        let outcome = Mutex::new(RegistryOutcome::default());
        {
            let status_changed =
                |event: &Arc<BreakEvent>| outcome.lock().status_changed.push(event.clone());
            let exception = |err: &Error| outcome.lock().errors.push(err.clone());
            let log =
                |is_stderr: bool, text: &str| outcome.lock().log_lines.push((is_stderr, text.to_string()));
            let hooks = RegistryHooks {
                status_changed: &status_changed,
                exception: &exception,
                log: &log,
            };
            f(shared.engine.as_ref(), &hooks);
        }
        outcome.into_inner()
    }

    /// Delivers a registry outcome: log lines, exception handling,
    /// then status notifications on `store` (or the bound store)
    fn settle(
        shared: &Arc<SessionShared>,
        outcome: RegistryOutcome,
        store: Option<&BreakEventStore>,
    ) {
        for (is_stderr, text) in &outcome.log_lines {
            Self::write_log(shared, *is_stderr, text);
        }
        for err in &outcome.errors {
            Self::dispatch_exception(shared, err);
        }
        if outcome.status_changed.is_empty() {
            return;
        }
        let bound;
        let target = match store {
            Some(store) => Some(store),
            None => {
                bound = shared.core.lock().store.clone();
                bound.as_deref()
            }
        };
        if let Some(store) = target {
            for event in &outcome.status_changed {
                store.notify_status_changed(event);
            }
        }
    }

    fn write_log(shared: &Arc<SessionShared>, is_stderr: bool, text: &str) {
        let writer = shared.output.lock().log.clone();
        match writer {
            Some(writer) => writer(is_stderr, text),
            None => {
                tracing::debug!(target: "tether_session::session", is_stderr, "{text}")
            }
        }
    }

    fn write_output(shared: &Arc<SessionShared>, is_stderr: bool, text: &str) {
        let writer = shared.output.lock().output.clone();
        if let Some(writer) = writer {
            writer(is_stderr, text);
        }
    }

    /// Store subscription handler: translates user edits to engine
    /// calls, serialized under the session lock
    fn on_store_event(shared: &Arc<SessionShared>, event: &StoreEvent) {
        // Raised by the session itself.
        if matches!(event, StoreEvent::StatusChanged(_)) {
            return;
        }
        // Edits made by the session (line relocation) echo back through
        // the store; skip them.
        if shared.registry.is_adjusting() {
            return;
        }
        let outcome = {
            let core = shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            let started = core.machine.is_started();
            Self::registry_op(shared, |engine, hooks| match event {
                StoreEvent::Added(be) => shared.registry.add(be, started, engine, hooks),
                StoreEvent::Removed(be) => shared.registry.remove(be.id(), engine, hooks),
                StoreEvent::Modified(be) => shared.registry.update(be.id(), engine, hooks),
                StoreEvent::EnableChanged(be) => {
                    shared
                        .registry
                        .update_enabled(be.id(), be.is_enabled(), engine, hooks)
                }
                StoreEvent::StatusChanged(_) => {}
            })
        };
        Self::settle(shared, outcome, None);
    }

    /// Registers and binds every break event of a freshly bound or
    /// freshly started store
    fn insert_store_events(shared: &Arc<SessionShared>, store: &BreakEventStore) {
        for event in store.events() {
            let outcome = {
                let core = shared.core.lock();
                if core.machine.is_disposed() {
                    return;
                }
                Self::registry_op(shared, |engine, hooks| {
                    shared.registry.add(&event, true, engine, hooks);
                })
            };
            Self::settle(shared, outcome, Some(store));
        }
    }

    /// Store read-only probe; must answer within a bounded wait even
    /// while the session lock is pinned under a blocking engine call
    fn check_read_only(shared: &Arc<SessionShared>) -> bool {
        let Some(core) = shared.core.try_lock_for(READ_ONLY_LOCK_WAIT) else {
            return true;
        };
        if core.machine.is_disposed() {
            return true;
        }
        drop(core);
        !shared.engine.allow_break_event_changes()
    }

    fn resolve_on(shared: &Arc<SessionShared>, expression: &str, location: &str) -> String {
        let hook: ResolverHook = match &shared.config.type_resolver_handler {
            Some(hook) => hook.clone(),
            None => {
                let weak = Self::weak(shared);
                Arc::new(move |expression: &str, location: &str| {
                    let Some(shared) = weak.upgrade() else {
                        return Ok(None);
                    };
                    let resolved = shared.engine.on_resolve_expression(expression, location)?;
                    Ok(Some(resolved))
                })
            }
        };
        shared
            .resolver
            .resolve(expression, location, &hook, |text| {
                Self::write_log(shared, false, text)
            })
    }

    /// Target-event entry point shared by real and synthesized events
    fn handle_target_event(shared: &Arc<SessionShared>, event: TargetEvent) {
        let link = Self::link(shared);
        if let Some(process) = &event.process {
            process.attach_session(link.clone());
        }
        if let Some(thread) = &event.thread {
            thread.attach_session(link.clone());
        }
        if let Some(backtrace) = &event.backtrace {
            backtrace.attach_session(link);
        }

        let (transition, store) = {
            let mut core = shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            // Invalidate before subscribers run so their queries
            // re-fetch fresh state.
            core.processes = None;
            (core.machine.apply_event(event.kind), core.store.clone())
        };

        tracing::debug!(
            target: "tether_session::session",
            kind = ?event.kind,
            transition = ?transition,
            "target event"
        );

        if transition == Transition::Started {
            if let Some(store) = &store {
                Self::insert_store_events(shared, store);
            }
        }

        if event.kind == TargetEventKind::TargetHitBreakpoint {
            Self::record_breakpoint_hit(shared, &event, store.as_deref());
        }

        shared.bus.emit(&event);
    }

    /// Hit bookkeeping: count, trace value, store refresh
    fn record_breakpoint_hit(
        shared: &Arc<SessionShared>,
        event: &TargetEvent,
        store: Option<&BreakEventStore>,
    ) {
        let Some(handle) = event.break_event_handle else {
            return;
        };
        let Some(break_event) = shared.registry.find_by_handle(handle) else {
            return;
        };
        break_event.increment_hit_count();

        if let Some(trace) = break_event
            .as_breakpoint()
            .and_then(|bp| bp.trace_expression)
        {
            let location = event
                .thread
                .as_ref()
                .and_then(|t| t.location.clone())
                .unwrap_or_default();
            // Without a resolver hook the raw expression is reported;
            // resolving through the engine here could re-enter a
            // backend that is mid-notification.
            let value = if shared.config.type_resolver_handler.is_some() {
                Self::resolve_on(shared, &trace, &location)
            } else {
                trace.clone()
            };
            break_event.set_last_trace_value(Some(value.clone()));
            if let Some(handler) = &shared.config.breakpoint_trace_handler {
                handler(&break_event, &value);
            }
        }

        if let Some(store) = store {
            store.notify_status_changed(&break_event);
        }
    }

    fn handle_started(shared: &Arc<SessionShared>, thread: Option<&ThreadInfo>) {
        let (first, store) = {
            let mut core = shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            (core.machine.mark_started(), core.store.clone())
        };
        if !first {
            return;
        }
        tracing::debug!(
            target: "tether_session::session",
            thread = thread.map(|t| t.tid),
            "engine reported startup"
        );
        if let Some(store) = &store {
            Self::insert_store_events(shared, store);
        }
    }

    fn handle_custom_action(
        shared: &Arc<SessionShared>,
        action_id: &str,
        handle: EventHandle,
    ) -> bool {
        let Some(break_event) = shared.registry.find_by_handle(handle) else {
            return true;
        };
        match &shared.config.custom_break_event_hit_handler {
            Some(handler) => handler(action_id, &break_event),
            None => true,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl SessionLink for SessionShared {
    fn threads(&self, pid: u32) -> Result<Vec<ThreadInfo>> {
        let threads = self.engine.on_get_threads(pid)?;
        let weak = self.weak_self.get().cloned().unwrap_or_else(Weak::new);
        for thread in &threads {
            thread.attach_session(weak.clone());
        }
        Ok(threads)
    }

    fn backtrace(&self, pid: u32, tid: u32) -> Result<Backtrace> {
        let backtrace = self.engine.on_get_thread_backtrace(pid, tid)?;
        let weak = self.weak_self.get().cloned().unwrap_or_else(Weak::new);
        backtrace.attach_session(weak);
        Ok(backtrace)
    }

    fn resolve_identifier(&self, identifier: &str, location: &str) -> Result<String> {
        let shared = self
            .weak_self
            .get()
            .and_then(Weak::upgrade)
            .ok_or(Error::Disposed)?;
        Ok(Session::resolve_on(&shared, identifier, location))
    }
}

impl SessionNotifier {
    /// Delivers a target event; drives the state machine, clears the
    /// process cache and fans out to subscribers on this thread
    pub fn notify_target_event(&self, event: TargetEvent) {
        if let Some(shared) = self.shared.upgrade() {
            Session::handle_target_event(&shared, event);
        }
    }

    /// Marks the session started; deferred break events get bound now
    pub fn notify_started(&self, thread: Option<&ThreadInfo>) {
        if let Some(shared) = self.shared.upgrade() {
            Session::handle_started(&shared, thread);
        }
    }

    /// Target stdout/stderr text
    pub fn notify_target_output(&self, is_stderr: bool, text: &str) {
        if let Some(shared) = self.shared.upgrade() {
            Session::write_output(&shared, is_stderr, text);
        }
    }

    /// Debugger diagnostic text
    pub fn notify_debugger_output(&self, is_stderr: bool, text: &str) {
        if let Some(shared) = self.shared.upgrade() {
            Session::write_log(&shared, is_stderr, text);
        }
    }

    /// Custom break-event action; the result decides whether the
    /// target stops (`true`) or resumes
    pub fn notify_custom_breakpoint_action(&self, action_id: &str, handle: EventHandle) -> bool {
        match self.shared.upgrade() {
            Some(shared) => Session::handle_custom_action(&shared, action_id, handle),
            None => true,
        }
    }

    /// Re-binds break events waiting on the loaded file
    pub fn notify_source_file_loaded(&self, path: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let outcome = {
            let core = shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            let policy = core.options.file_case_policy;
            Session::registry_op(&shared, |engine, hooks| {
                shared
                    .registry
                    .source_file_loaded(path, policy, engine, hooks);
            })
        };
        Session::settle(&shared, outcome, None);
    }

    /// Forgets handles bound in the unloaded file; the backend has
    /// already dropped them
    pub fn notify_source_file_unloaded(&self, path: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let outcome = {
            let core = shared.core.lock();
            if core.machine.is_disposed() {
                return;
            }
            let policy = core.options.file_case_policy;
            Session::registry_op(&shared, |_engine, hooks| {
                shared.registry.source_file_unloaded(path, policy, hooks);
            })
        };
        Session::settle(&shared, outcome, None);
    }

    /// Moves a breakpoint to the line the engine actually bound,
    /// without echoing the edit back to the engine
    pub fn adjust_breakpoint_location(&self, id: BreakEventId, new_line: u32) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let store = shared.core.lock().store.clone();
        let Some(store) = store else { return };
        let Some(event) = store.events().into_iter().find(|be| be.id() == id) else {
            return;
        };
        shared.registry.adjust_location(&event, new_line, &store);
    }

    /// Engine-initiated validity/status update for a break event
    pub fn set_break_event_status(
        &self,
        id: BreakEventId,
        is_valid: bool,
        status_message: Option<String>,
    ) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let outcome = Session::registry_op(&shared, |_engine, hooks| {
            shared.registry.set_status(id, is_valid, status_message, hooks);
        });
        Session::settle(&shared, outcome, None);
    }

    /// Busy-state fan-out to session subscribers
    pub fn set_busy_state(&self, state: BusyState) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let handlers: Vec<BusyHandler> = {
            let core = shared.core.lock();
            core.busy_handlers.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            handler(&state);
        }
    }
}
