//! Common types shared by the tether crates
//!
//! This module is organized into submodules by functionality:
//! - `break_event` - Breakpoints, catchpoints and their identifiers
//! - `event` - Target event notifications
//! - `process` - Launch configuration and process information
//! - `thread` - Threads, stack frames and backtraces
//! - `options` - Session and evaluation options
//! - `assembly` - Disassembly lines

pub mod assembly;
pub mod break_event;
pub mod event;
pub mod options;
pub mod process;
pub mod thread;

pub use assembly::*;
pub use break_event::*;
pub use event::*;
pub use options::*;
pub use process::*;
pub use thread::*;
