//! Tether Common Types
//!
//! Shared types used by the tether debugger session front-end: break
//! events, target events, process and thread value objects, options,
//! the error type and logging setup.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::{init_logging, init_logging_from_file, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
