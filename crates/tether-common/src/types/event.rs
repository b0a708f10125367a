//! Target event types delivered from the engine to the session

use serde::{Deserialize, Serialize};

use super::break_event::EventHandle;
use super::process::ProcessInfo;
use super::thread::{Backtrace, ThreadInfo};

/// Kind of a target notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetEventKind {
    /// The engine finished initializing the target
    TargetReady,
    TargetStopped,
    /// Stopped because the user asked for an interrupt
    TargetInterrupted,
    TargetHitBreakpoint,
    TargetSignaled,
    TargetExited,
    TargetExceptionThrown,
    TargetUnhandledException,
    ThreadStarted,
    ThreadStopped,
}

impl TargetEventKind {
    /// Whether receipt of this kind transitions the session to Stopped
    pub fn is_stop_event(&self) -> bool {
        matches!(
            self,
            TargetEventKind::TargetStopped
                | TargetEventKind::TargetInterrupted
                | TargetEventKind::TargetHitBreakpoint
                | TargetEventKind::TargetSignaled
                | TargetEventKind::TargetExceptionThrown
                | TargetEventKind::TargetUnhandledException
        )
    }
}

/// An asynchronous notification about the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEvent {
    pub kind: TargetEventKind,
    pub process: Option<ProcessInfo>,
    pub thread: Option<ThreadInfo>,
    pub backtrace: Option<Backtrace>,
    /// Handle of the break event that caused the stop, for
    /// [`TargetEventKind::TargetHitBreakpoint`]
    pub break_event_handle: Option<EventHandle>,
}

impl TargetEvent {
    pub fn new(kind: TargetEventKind) -> Self {
        Self {
            kind,
            process: None,
            thread: None,
            backtrace: None,
            break_event_handle: None,
        }
    }

    pub fn with_process(mut self, process: ProcessInfo) -> Self {
        self.process = Some(process);
        self
    }

    pub fn with_thread(mut self, thread: ThreadInfo) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = Some(backtrace);
        self
    }

    pub fn with_break_event_handle(mut self, handle: EventHandle) -> Self {
        self.break_event_handle = Some(handle);
        self
    }

    pub fn is_stop_event(&self) -> bool {
        self.kind.is_stop_event()
    }
}

/// Engine busy-state notification payload
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BusyState {
    pub is_busy: bool,
    pub description: String,
}

impl BusyState {
    pub fn busy(description: impl Into<String>) -> Self {
        Self {
            is_busy: true,
            description: description.into(),
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_event_kinds() {
        assert!(TargetEventKind::TargetStopped.is_stop_event());
        assert!(TargetEventKind::TargetInterrupted.is_stop_event());
        assert!(TargetEventKind::TargetHitBreakpoint.is_stop_event());
        assert!(TargetEventKind::TargetSignaled.is_stop_event());
        assert!(TargetEventKind::TargetExceptionThrown.is_stop_event());
        assert!(TargetEventKind::TargetUnhandledException.is_stop_event());
    }

    #[test]
    fn test_non_stop_event_kinds() {
        assert!(!TargetEventKind::TargetReady.is_stop_event());
        assert!(!TargetEventKind::TargetExited.is_stop_event());
        assert!(!TargetEventKind::ThreadStarted.is_stop_event());
        assert!(!TargetEventKind::ThreadStopped.is_stop_event());
    }

    #[test]
    fn test_target_event_builder() {
        let event = TargetEvent::new(TargetEventKind::TargetHitBreakpoint)
            .with_thread(ThreadInfo::new(1, 2))
            .with_break_event_handle(EventHandle(7));
        assert!(event.is_stop_event());
        assert_eq!(event.break_event_handle, Some(EventHandle(7)));
        assert_eq!(event.thread.as_ref().map(|t| t.tid), Some(2));
    }

    #[test]
    fn test_target_event_serialization() {
        let event = TargetEvent::new(TargetEventKind::TargetExited);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: TargetEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, TargetEventKind::TargetExited);
    }

    #[test]
    fn test_busy_state() {
        let busy = BusyState::busy("evaluating");
        assert!(busy.is_busy);
        assert_eq!(busy.description, "evaluating");
        assert!(!BusyState::idle().is_busy);
    }
}
