//! Module configuration.

use serde::{Deserialize, Serialize};

use crate::error::DslResult;

/// Settings fixed for the lifetime of a [`Module`](crate::Module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Initial linear memory size in 64 KiB pages.
    pub initial_pages: u64,
    /// Upper bound for `memory.grow`, if any.
    pub maximum_pages: Option<u64>,
    /// Name under which the memory is exported; `None` keeps it private.
    pub memory_export: Option<String>,
    /// Emit runtime checks for null values, null dereferences and pointer
    /// alignment, and honour `wasm_insist!`.
    pub debug_checks: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            initial_pages: 1,
            maximum_pages: None,
            memory_export: Some("memory".to_string()),
            debug_checks: cfg!(debug_assertions),
        }
    }
}

impl ModuleConfig {
    /// Parse a configuration; missing fields take their default.
    pub fn from_json(data: &[u8]) -> DslResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_json(&self) -> DslResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
