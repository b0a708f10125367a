//! Tether Session Front-End
//!
//! The coordination layer between a user interface and a concrete
//! debugging engine. It mediates commands (run, attach, continue,
//! step, stop), delivers asynchronous target events to typed
//! subscribers, and keeps the user's break-event store and the
//! backend's break-event bindings consistent across failures, source
//! reloads and code relocation.
//!
//! # Driving a session
//!
//! ```no_run
//! use tether_common::{Breakpoint, BreakEvent, StartInfo, TargetEventKind};
//! use tether_session::{Session, SessionConfig};
//! # fn make_engine() -> Box<dyn tether_session::Engine> { unimplemented!() }
//!
//! let session = Session::new(make_engine(), SessionConfig::new());
//!
//! // Break events live in the store; the session mirrors them into
//! // the engine as the target starts and source files come and go.
//! let store = session.break_event_store();
//! store.add(BreakEvent::breakpoint(Breakpoint::new("main.cs", 42)));
//!
//! session.bus().subscribe(TargetEventKind::TargetStopped, |event| {
//!     println!("stopped: {:?}", event.thread);
//! });
//!
//! session.run(&StartInfo::new("/bin/app")).unwrap();
//! ```
//!
//! # Implementing a backend
//!
//! Backends implement the [`Engine`] trait and report asynchronous
//! target state through the [`SessionNotifier`] they receive on
//! `on_run`/`on_attach`. See the trait documentation for the
//! threading and break-event contracts.

mod bus;
mod dispatcher;
mod engine;
mod registry;
mod resolver;
mod session;
mod state;
mod store;

pub use bus::{EventBus, SubscriberId};
pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use registry::{BreakEventInfo, BreakEventRegistry, RegistryHooks};
pub use resolver::{
    EvaluatorFactory, ExpressionEvaluator, ExpressionResolverCache, LiteralEvaluator,
    ResolverHook,
};
pub use session::{
    BusyHandler, CustomHitHandler, ExceptionHandler, HandlerId, OutputWriter, Session,
    SessionConfig, SessionNotifier, StartedHandler, TraceHandler,
};
pub use state::{SessionState, StateMachine, Transition};
pub use store::{BreakEventStore, StoreEvent, StoreSubscriberId};
