//! VM configuration.

use serde::{Deserialize, Serialize};

/// Buffer sizes and limits for one VM instance.
///
/// Deserializes from partial documents; missing keys take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum nested bytecode calls.
    pub max_call_depth: usize,
    /// Words available for saving overlapped local windows.
    pub local_stack_size: usize,
    /// Bytes in the tempstrings ring; 0 disables runtime strings.
    pub tempstrings_size: usize,
    /// Entities in the entity buffer; 0 disables entity access.
    pub max_entities: usize,
    /// Statements a single `run` may execute; `None` is unbounded.
    pub statement_limit: Option<u64>,
}

impl VmConfig {
    pub const DEFAULT_CALL_DEPTH: usize = 32;
    pub const DEFAULT_LOCAL_STACK: usize = 2048;
    pub const DEFAULT_TEMPSTRINGS: usize = 4096;

    pub fn with_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities;
        self
    }

    pub fn with_statement_limit(mut self, limit: u64) -> Self {
        self.statement_limit = Some(limit);
        self
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: Self::DEFAULT_CALL_DEPTH,
            local_stack_size: Self::DEFAULT_LOCAL_STACK,
            tempstrings_size: Self::DEFAULT_TEMPSTRINGS,
            max_entities: 0,
            statement_limit: None,
        }
    }
}
