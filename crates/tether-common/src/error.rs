//! Error types for tether

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A concrete engine entry point failed.
    #[error("Engine failure in {operation}: {message}")]
    EngineFailure {
        operation: &'static str,
        message: String,
    },

    /// The engine refused or failed to bind a break event.
    #[error("Could not set breakpoint at location '{location}': {message}")]
    BreakpointBind { location: String, message: String },

    /// A command was issued in a state that does not accept it.
    #[error("Invalid state for {command}: session is {state}")]
    InvalidState {
        command: &'static str,
        state: &'static str,
    },

    /// A required input was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The expression resolver hook failed.
    #[error("Expression resolver error: {0}")]
    Resolver(String),

    /// The session has been disposed.
    #[error("Session is disposed")]
    Disposed,

    /// Catch-all for backend-specific failures.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps a backend error for the given engine entry point.
    pub fn engine(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Error::EngineFailure {
            operation,
            message: err.to_string(),
        }
    }
}
