//! Chat message value type

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A completed unit of conversation
///
/// Immutable once built. Two messages are equal when their timestamps are
/// equal; two messages stamped in the same millisecond therefore compare
/// equal even if their text differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    text: String,
    timestamp: Timestamp,
}

impl Message {
    /// Stamp `text` with the current time
    pub fn new(text: impl Into<String>) -> Self {
        Self::at(text, Timestamp::now())
    }

    /// Build a message with an explicit timestamp
    pub fn at(text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            text: text.into(),
            timestamp,
        }
    }

    /// Build a chat line of the form `<name><separator><body>`
    pub fn compose(name: &str, separator: &str, body: &str) -> Self {
        Self::new(format!("{}{}{}", name, separator, body))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Display name of the sender: everything before the first `separator`,
    /// or the whole line when the separator is absent
    pub fn sender_name(&self, separator: &str) -> &str {
        sender_name_of(&self.text, separator)
    }

    /// Body of the line after the sender name, if a separator is present
    pub fn body(&self, separator: &str) -> Option<&str> {
        if separator.is_empty() {
            return None;
        }
        self.text
            .split_once(separator)
            .map(|(_, body)| body)
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for Message {}

/// Parse the sender display name out of a raw chat line
pub fn sender_name_of<'a>(line: &'a str, separator: &str) -> &'a str {
    if separator.is_empty() {
        return line;
    }
    match line.split_once(separator) {
        Some((name, _)) => name,
        None => line,
    }
}
