//! Disassembly line types

use serde::{Deserialize, Serialize};

/// One line of disassembly as produced by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyLine {
    pub address: u64,
    /// Disassembled instruction text
    pub code: String,
    /// Source line this instruction maps to, when known
    pub source_line: Option<u32>,
}

impl AssemblyLine {
    pub fn new(address: u64, code: impl Into<String>) -> Self {
        Self {
            address,
            code: code.into(),
            source_line: None,
        }
    }

    pub fn with_source_line(mut self, line: u32) -> Self {
        self.source_line = Some(line);
        self
    }
}
