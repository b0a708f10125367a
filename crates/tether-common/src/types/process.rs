//! Process launch and process information types

use serde::{Deserialize, Serialize};
use std::sync::{OnceLock, Weak};

use super::thread::{upgrade_link, SessionLink, ThreadInfo};
use crate::error::Result;

/// Configuration for launching a debuggee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInfo {
    /// Path to the executable
    pub executable: String,

    /// Command line arguments
    pub args: Vec<String>,

    /// Working directory (None = inherit)
    pub working_dir: Option<String>,

    /// Environment variables to set (in addition to inherited)
    pub env: Vec<(String, String)>,

    /// Stop at the program entry point before running user code
    pub stop_at_entry: bool,
}

impl StartInfo {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            stop_at_entry: false,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stop_at_entry(mut self) -> Self {
        self.stop_at_entry = true;
        self
    }
}

/// A debugged process as reported by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process ID
    pub pid: u32,
    /// Process name or command line
    pub name: String,

    #[serde(skip)]
    session: OnceLock<Weak<dyn SessionLink>>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            session: OnceLock::new(),
        }
    }

    /// Installs the session back-reference; a no-op if already attached
    pub fn attach_session(&self, link: Weak<dyn SessionLink>) {
        let _ = self.session.set(link);
    }

    /// Threads of this process, routed through the session
    pub fn threads(&self) -> Result<Vec<ThreadInfo>> {
        upgrade_link(&self.session)?.threads(self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_start_info_builder() {
        let info = StartInfo::new("/bin/app")
            .with_args(vec!["--verbose".to_string()])
            .with_working_dir("/tmp")
            .with_env("RUST_LOG", "debug")
            .stop_at_entry();
        assert_eq!(info.executable, "/bin/app");
        assert_eq!(info.args, vec!["--verbose"]);
        assert_eq!(info.working_dir.as_deref(), Some("/tmp"));
        assert_eq!(info.env.len(), 1);
        assert!(info.stop_at_entry);
    }

    #[test]
    fn test_process_info_threads_without_session() {
        let p = ProcessInfo::new(1234, "app");
        assert!(matches!(p.threads(), Err(Error::Disposed)));
    }

    #[test]
    fn test_start_info_serialization() {
        let info = StartInfo::new("app.exe").with_args(vec!["-x".to_string()]);
        let json = serde_json::to_string(&info).unwrap();
        let parsed: StartInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.executable, "app.exe");
        assert_eq!(parsed.args, vec!["-x"]);
    }

    #[test]
    fn test_process_info_serialization() {
        let p = ProcessInfo::new(42, "game");
        let json = serde_json::to_string(&p).unwrap();
        let parsed: ProcessInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.pid, 42);
        assert_eq!(parsed.name, "game");
    }
}
