//! Break-event types (breakpoints and catchpoints)

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Unique identifier for a break event
///
/// Minted once per break event; identity is stable for the lifetime of
/// the event regardless of edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakEventId(pub u64);

/// Opaque engine-assigned identifier for an installed break event
///
/// Backends mint the token values; equality is value equality on the
/// minted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventHandle(pub u64);

/// Counter for generating unique break-event IDs
static BREAK_EVENT_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_break_event_id() -> BreakEventId {
    BreakEventId(BREAK_EVENT_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Hit-count filter applied by the engine before reporting a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HitCountMode {
    /// No filtering, every hit is reported
    #[default]
    None,
    LessThan,
    LessThanOrEqual,
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    MultipleOf,
}

/// Source-location breakpoint data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Source file path
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column (0 = whole line)
    pub column: u32,
    /// Conditional expression; the target only stops when it holds
    pub condition: Option<String>,
    /// Hit-count filter mode
    pub hit_count_mode: HitCountMode,
    /// Operand for the hit-count filter
    pub hit_count_filter: u64,
    /// Trace expression; when set the target does not stop, the
    /// formatted value is reported instead
    pub trace_expression: Option<String>,
}

impl Breakpoint {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: 0,
            condition: None,
            hit_count_mode: HitCountMode::None,
            hit_count_filter: 0,
            trace_expression: None,
        }
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = column;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_hit_count(mut self, mode: HitCountMode, filter: u64) -> Self {
        self.hit_count_mode = mode;
        self.hit_count_filter = filter;
        self
    }

    pub fn with_trace(mut self, expression: impl Into<String>) -> Self {
        self.trace_expression = Some(expression.into());
        self
    }
}

/// Exception catchpoint data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catchpoint {
    /// Fully qualified exception type name
    pub exception_type: String,
    /// Whether subclasses of the exception type also trigger
    pub include_subclasses: bool,
}

impl Catchpoint {
    pub fn new(exception_type: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            include_subclasses: false,
        }
    }

    pub fn with_subclasses(mut self) -> Self {
        self.include_subclasses = true;
        self
    }
}

/// Kind-specific data of a break event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BreakEventKind {
    Breakpoint(Breakpoint),
    Catchpoint(Catchpoint),
}

/// A user-configurable break event, shared between the store and the
/// session
///
/// The session updates the hit count and last trace value as the target
/// runs; the user edits the kind data through the store. Share as
/// `Arc<BreakEvent>`; identity is the [`BreakEventId`].
#[derive(Debug)]
pub struct BreakEvent {
    id: BreakEventId,
    kind: Mutex<BreakEventKind>,
    enabled: AtomicBool,
    hit_count: AtomicU64,
    last_trace_value: Mutex<Option<String>>,
    /// Opaque per-user tag, never interpreted by the session
    tag: Mutex<Option<String>>,
}

impl BreakEvent {
    pub fn breakpoint(bp: Breakpoint) -> Self {
        Self::new(BreakEventKind::Breakpoint(bp))
    }

    pub fn catchpoint(cp: Catchpoint) -> Self {
        Self::new(BreakEventKind::Catchpoint(cp))
    }

    fn new(kind: BreakEventKind) -> Self {
        Self {
            id: next_break_event_id(),
            kind: Mutex::new(kind),
            enabled: AtomicBool::new(true),
            hit_count: AtomicU64::new(0),
            last_trace_value: Mutex::new(None),
            tag: Mutex::new(None),
        }
    }

    pub fn id(&self) -> BreakEventId {
        self.id
    }

    /// Snapshot of the kind-specific data
    pub fn kind(&self) -> BreakEventKind {
        self.kind.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the kind-specific data (a user edit through the store)
    pub fn set_kind(&self, kind: BreakEventKind) {
        *self.kind.lock().unwrap_or_else(|e| e.into_inner()) = kind;
    }

    /// Breakpoint data, if this event is a breakpoint
    pub fn as_breakpoint(&self) -> Option<Breakpoint> {
        match self.kind() {
            BreakEventKind::Breakpoint(bp) => Some(bp),
            BreakEventKind::Catchpoint(_) => None,
        }
    }

    /// Catchpoint data, if this event is a catchpoint
    pub fn as_catchpoint(&self) -> Option<Catchpoint> {
        match self.kind() {
            BreakEventKind::Catchpoint(cp) => Some(cp),
            BreakEventKind::Breakpoint(_) => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::SeqCst)
    }

    pub fn set_hit_count(&self, count: u64) {
        self.hit_count.store(count, Ordering::SeqCst);
    }

    /// Increments the hit count, returning the new value
    pub fn increment_hit_count(&self) -> u64 {
        self.hit_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_trace_value(&self) -> Option<String> {
        self.last_trace_value
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_last_trace_value(&self, value: Option<String>) {
        *self
            .last_trace_value
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub fn tag(&self) -> Option<String> {
        self.tag.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_tag(&self, tag: Option<String>) {
        *self.tag.lock().unwrap_or_else(|e| e.into_inner()) = tag;
    }

    /// Human-readable location, used in diagnostics
    /// (`foo.cs:42` for breakpoints, the exception name for catchpoints)
    pub fn location_display(&self) -> String {
        match self.kind() {
            BreakEventKind::Breakpoint(bp) => format!("{}:{}", bp.file, bp.line),
            BreakEventKind::Catchpoint(cp) => cp.exception_type,
        }
    }
}
