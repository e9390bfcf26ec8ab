//! Runtime messages: generated code → originating source location.
//!
//! Every `insist` and `throw` emitted into a module records where it was
//! generated and an optional message.  Generated code only passes the
//! message's index to the host callback; the table is embedded in the
//! binary as the custom section [`MESSAGES_SECTION`] so that the host can
//! resolve the index back to a human-readable report.

use serde::{Deserialize, Serialize};

use crate::error::DslResult;

/// Name of the custom section holding the JSON-encoded [`MessageTable`].
pub const MESSAGES_SECTION: &str = "qwasm.messages";

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Source file of the generator code that emitted the check.
    pub file: String,
    /// 1-based line in `file`.
    pub line: u32,
    pub message: Option<String>,
}

/// All messages of a module, indexed by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTable {
    pub entries: Vec<Message>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message and return its index.
    pub fn push(&mut self, file: impl Into<String>, line: u32, message: Option<&str>) -> u32 {
        self.entries.push(Message {
            file: file.into(),
            line,
            message: message.map(str::to_string),
        });
        (self.entries.len() - 1) as u32
    }

    pub fn get(&self, index: u32) -> Option<&Message> {
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to JSON bytes for embedding in a custom section.
    pub fn to_json(&self) -> DslResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> DslResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_json() {
        let mut table = MessageTable::new();
        table.push("gen.rs", 10, None);
        table.push("gen.rs", 42, Some("index out of range"));

        let back = MessageTable::from_json(&table.to_json().unwrap()).expect("parse failed");
        assert_eq!(back, table);
        assert_eq!(back.get(1).and_then(|m| m.message.as_deref()), Some("index out of range"));
    }

    #[test]
    fn indices_are_positions() {
        let mut table = MessageTable::new();
        assert_eq!(table.push("a.rs", 1, None), 0);
        assert_eq!(table.push("b.rs", 2, None), 1);
        assert_eq!(table.get(1).map(|m| m.file.as_str()), Some("b.rs"));
        assert!(table.get(2).is_none());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(MessageTable::from_json(b"not json").is_err());
    }
}
