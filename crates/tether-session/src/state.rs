//! Session state machine
//!
//! Tracks the lifecycle of the debugged target and gates which commands
//! are acceptable in each state. Mutated only under the session lock.

use tether_common::{Error, Result, TargetEventKind};

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, target not launched yet
    Idle,
    /// Target executing
    Running,
    /// Target suspended, inspectable
    Stopped,
    /// Target gone; terminal
    Exited,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Running => "Running",
            SessionState::Stopped => "Stopped",
            SessionState::Exited => "Exited",
        }
    }
}

/// Transition produced by applying a target event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change
    None,
    /// Entered Stopped
    Stopped,
    /// Entered Exited (terminal)
    Exited,
    /// First TargetReady: engine finished initializing
    Started,
}

/// State machine plus the session flags that travel with it
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    /// Engine initialized and first TargetReady received; break-event
    /// binding is deferred until this is set
    started: bool,
    /// Session attached to an existing process rather than launching
    attached: bool,
    disposed: bool,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            started: false,
            attached: false,
            disposed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    /// Requires the current state to be one of `accepted`
    pub fn require(&self, command: &'static str, accepted: &[SessionState]) -> Result<()> {
        if accepted.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                command,
                state: self.state.name(),
            })
        }
    }

    /// Transition for commands that start or resume execution
    ///
    /// The caller raises the target-started signal after this returns
    /// and before the engine call is made.
    pub fn on_running(&mut self) {
        self.state = SessionState::Running;
    }

    /// Applies a target event to the machine
    pub fn apply_event(&mut self, kind: TargetEventKind) -> Transition {
        if self.state == SessionState::Exited {
            return Transition::None;
        }
        match kind {
            TargetEventKind::TargetExited => {
                self.state = SessionState::Exited;
                self.started = false;
                self.attached = false;
                Transition::Exited
            }
            TargetEventKind::TargetReady => {
                if self.started {
                    Transition::None
                } else {
                    self.started = true;
                    Transition::Started
                }
            }
            kind if kind.is_stop_event() => {
                self.state = SessionState::Stopped;
                Transition::Stopped
            }
            _ => Transition::None,
        }
    }

    /// Marks the session started outside of TargetReady delivery
    /// (engines that report startup through `notify_started`)
    pub fn mark_started(&mut self) -> bool {
        if self.started {
            false
        } else {
            self.started = true;
            true
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let machine = StateMachine::new();
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(!machine.is_started());
        assert!(!machine.is_attached());
        assert!(!machine.is_disposed());
    }

    #[test]
    fn test_idle_accepts_run_and_rejects_continue() {
        let machine = StateMachine::new();
        assert!(machine.require("run", &[SessionState::Idle]).is_ok());
        assert!(machine.require("continue", &[SessionState::Stopped]).is_err());
    }

    #[test]
    fn test_running_transition_and_stop_event() {
        let mut machine = StateMachine::new();
        machine.on_running();
        assert_eq!(machine.state(), SessionState::Running);

        let t = machine.apply_event(TargetEventKind::TargetStopped);
        assert_eq!(t, Transition::Stopped);
        assert_eq!(machine.state(), SessionState::Stopped);
    }

    #[test]
    fn test_all_stop_kinds_move_to_stopped() {
        for kind in [
            TargetEventKind::TargetStopped,
            TargetEventKind::TargetInterrupted,
            TargetEventKind::TargetHitBreakpoint,
            TargetEventKind::TargetSignaled,
            TargetEventKind::TargetExceptionThrown,
            TargetEventKind::TargetUnhandledException,
        ] {
            let mut machine = StateMachine::new();
            machine.on_running();
            assert_eq!(machine.apply_event(kind), Transition::Stopped);
        }
    }

    #[test]
    fn test_exited_is_terminal() {
        let mut machine = StateMachine::new();
        machine.on_running();
        machine.mark_started();
        machine.set_attached(true);

        assert_eq!(
            machine.apply_event(TargetEventKind::TargetExited),
            Transition::Exited
        );
        assert_eq!(machine.state(), SessionState::Exited);
        assert!(!machine.is_started());
        assert!(!machine.is_attached());

        // Nothing moves the machine out of Exited
        assert_eq!(
            machine.apply_event(TargetEventKind::TargetStopped),
            Transition::None
        );
        assert_eq!(machine.state(), SessionState::Exited);
    }

    #[test]
    fn test_target_ready_sets_started_once() {
        let mut machine = StateMachine::new();
        machine.on_running();
        assert_eq!(
            machine.apply_event(TargetEventKind::TargetReady),
            Transition::Started
        );
        assert!(machine.is_started());
        assert_eq!(
            machine.apply_event(TargetEventKind::TargetReady),
            Transition::None
        );
    }

    #[test]
    fn test_mark_started_idempotent() {
        let mut machine = StateMachine::new();
        assert!(machine.mark_started());
        assert!(!machine.mark_started());
    }

    #[test]
    fn test_thread_events_do_not_change_state() {
        let mut machine = StateMachine::new();
        machine.on_running();
        assert_eq!(
            machine.apply_event(TargetEventKind::ThreadStarted),
            Transition::None
        );
        assert_eq!(machine.state(), SessionState::Running);
    }
}
