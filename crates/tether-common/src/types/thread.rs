//! Thread and backtrace types

use serde::{Deserialize, Serialize};
use std::sync::{OnceLock, Weak};

use crate::error::{Error, Result};

/// Query surface installed on engine-produced value objects
///
/// The session implements this; process, thread and backtrace objects
/// hold a weak reference so later queries (list threads, expand a frame)
/// route back through the façade. A dead reference means the session is
/// gone and queries fail with [`Error::Disposed`].
pub trait SessionLink: Send + Sync {
    /// Threads of the given process
    fn threads(&self, pid: u32) -> Result<Vec<ThreadInfo>>;

    /// Backtrace of the given thread
    fn backtrace(&self, pid: u32, tid: u32) -> Result<Backtrace>;

    /// Resolves an identifier in the context of a source location
    fn resolve_identifier(&self, identifier: &str, location: &str) -> Result<String>;
}

pub(crate) fn upgrade_link(
    link: &OnceLock<Weak<dyn SessionLink>>,
) -> Result<std::sync::Arc<dyn SessionLink>> {
    link.get()
        .and_then(Weak::upgrade)
        .ok_or(Error::Disposed)
}

/// Thread information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    /// Owning process ID
    pub pid: u32,
    /// Thread ID
    pub tid: u32,
    /// Thread name, when the runtime provides one
    pub name: Option<String>,
    /// Current location description (`file:line` or a symbol)
    pub location: Option<String>,

    #[serde(skip)]
    session: OnceLock<Weak<dyn SessionLink>>,
}

impl ThreadInfo {
    pub fn new(pid: u32, tid: u32) -> Self {
        Self {
            pid,
            tid,
            name: None,
            location: None,
            session: OnceLock::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Installs the session back-reference; a no-op if already attached
    pub fn attach_session(&self, link: Weak<dyn SessionLink>) {
        let _ = self.session.set(link);
    }

    /// Backtrace of this thread, routed through the session
    pub fn backtrace(&self) -> Result<Backtrace> {
        upgrade_link(&self.session)?.backtrace(self.pid, self.tid)
    }
}

/// A single backtrace frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    /// 0 = innermost
    pub index: u32,
    pub address: u64,
    /// Symbol or method name, when known
    pub symbol: Option<String>,
    pub source_file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    /// Location string used as resolver-cache key (`file:line`,
    /// falling back to the frame address)
    pub fn location_string(&self) -> String {
        match (&self.source_file, self.line) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            _ => format!("{:#x}", self.address),
        }
    }
}

/// A stopped thread's call stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backtrace {
    pub frames: Vec<StackFrame>,

    #[serde(skip)]
    session: OnceLock<Weak<dyn SessionLink>>,
}

impl Backtrace {
    pub fn new(frames: Vec<StackFrame>) -> Self {
        Self {
            frames,
            session: OnceLock::new(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Installs the session back-reference; a no-op if already attached
    pub fn attach_session(&self, link: Weak<dyn SessionLink>) {
        let _ = self.session.set(link);
    }

    /// Resolves an identifier in the context of the given frame,
    /// routed through the session
    pub fn resolve_identifier(&self, frame_index: usize, identifier: &str) -> Result<String> {
        let frame = self
            .frames
            .get(frame_index)
            .ok_or(Error::InvalidArgument("frame index out of range"))?;
        upgrade_link(&self.session)?.resolve_identifier(identifier, &frame.location_string())
    }
}
