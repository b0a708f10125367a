//! Session option types
//!
//! Options are fixed once the session starts; only the evaluation
//! sub-options may be swapped afterwards.

use serde::{Deserialize, Serialize};

/// Which members the expression evaluator may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MemberVisibility {
    /// Public members only
    Public,
    /// Public and protected members
    Protected,
    /// Everything, including private members
    #[default]
    All,
}

/// Expression evaluation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOptions {
    /// Per-evaluation timeout in milliseconds
    #[serde(default = "default_eval_timeout_ms")]
    pub timeout_ms: u64,

    /// Allow the evaluator to invoke target code (property getters,
    /// ToString-style formatting)
    #[serde(default = "default_true")]
    pub allow_invocations: bool,

    /// Member visibility filter
    #[serde(default)]
    pub member_visibility: MemberVisibility,
}

fn default_eval_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_eval_timeout_ms(),
            allow_invocations: true,
            member_visibility: MemberVisibility::default(),
        }
    }
}

/// Default stepping granularity preferred by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SteppingGranularity {
    #[default]
    SourceLine,
    Instruction,
}

/// Process-attach preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachOptions {
    /// Interrupt the target right after attaching
    #[serde(default = "default_true")]
    pub stop_on_attach: bool,

    /// Retry interval if attachment fails (ms)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Maximum number of retries (None = no retry)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_retry_interval_ms() -> u64 {
    500
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stop_on_attach: true,
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: None,
        }
    }
}

/// How source file paths are compared when re-binding breakpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FileCasePolicy {
    /// Case-sensitive comparison
    Sensitive,
    /// Case-insensitive comparison
    Insensitive,
    /// Resolve from the host platform (insensitive on Windows)
    #[default]
    Platform,
}

impl FileCasePolicy {
    /// Whether two paths refer to the same file under this policy
    pub fn paths_equal(&self, a: &str, b: &str) -> bool {
        match self.resolve() {
            FileCasePolicy::Insensitive => a.eq_ignore_ascii_case(b),
            _ => a == b,
        }
    }

    fn resolve(&self) -> FileCasePolicy {
        match self {
            FileCasePolicy::Platform => {
                if cfg!(windows) {
                    FileCasePolicy::Insensitive
                } else {
                    FileCasePolicy::Sensitive
                }
            }
            other => *other,
        }
    }
}

/// Session options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionOptions {
    #[serde(default)]
    pub evaluation: EvaluationOptions,

    #[serde(default)]
    pub stepping_granularity: SteppingGranularity,

    #[serde(default)]
    pub attach: AttachOptions,

    #[serde(default)]
    pub file_case_policy: FileCasePolicy,
}
