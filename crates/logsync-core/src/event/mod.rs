//! Push-channel events and their NDJSON codec.

pub mod types;

pub use types::{EventKind, UnknownEventKind};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{Cursor, Message, SourceRef};

/// One server-pushed change to a source's message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub cursor: Cursor,
    pub node: Message,
}

impl Event {
    #[must_use]
    pub const fn added(cursor: Cursor, node: Message) -> Self {
        Self {
            kind: EventKind::Added,
            cursor,
            node,
        }
    }

    #[must_use]
    pub const fn deleted(cursor: Cursor, node: Message) -> Self {
        Self {
            kind: EventKind::Deleted,
            cursor,
            node,
        }
    }

    /// The source that owns the event's message.
    #[must_use]
    pub const fn owner(&self) -> &SourceRef {
        &self.node.source
    }
}

/// Parse one NDJSON line. Blank lines and `#` comments yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`SyncError::Decode`] carrying `line_no` when the line is not a
/// valid event object.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Event>, SyncError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| SyncError::Decode {
            line: line_no,
            reason: e.to_string(),
        })
}

/// Parse a whole NDJSON document.
///
/// # Errors
///
/// Returns the first [`SyncError::Decode`] encountered.
pub fn parse_lines(input: &str) -> Result<Vec<Event>, SyncError> {
    let mut events = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        if let Some(event) = parse_line(line, idx + 1)? {
            events.push(event);
        }
    }
    Ok(events)
}

/// Serialize an event as one NDJSON line (no trailing newline).
///
/// # Errors
///
/// Returns [`SyncError::Decode`] if serialization fails.
pub fn to_line(event: &Event) -> Result<String, SyncError> {
    serde_json::to_string(event).map_err(|e| SyncError::Decode {
        line: 0,
        reason: e.to_string(),
    })
}
