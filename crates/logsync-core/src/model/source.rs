use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{Cursor, SourceId};
use super::message::Message;

/// The closed set of log source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    /// A bundler or build process.
    Process,
    /// A connected device or simulator.
    Device,
    /// The project issues list. Hidden unless it has messages.
    Issues,
}

impl SourceKind {
    pub const ALL: [Self; 3] = [Self::Process, Self::Device, Self::Issues];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Process => "Process",
            Self::Device => "Device",
            Self::Issues => "Issues",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Process" | "process" => Ok(Self::Process),
            "Device" | "device" => Ok(Self::Device),
            "Issues" | "issues" => Ok(Self::Issues),
            other => Err(format!(
                "unknown source kind '{other}': expected Process, Device or Issues"
            )),
        }
    }
}

/// Reference from a message to the source that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: SourceId,
    pub kind: SourceKind,
}

impl SourceRef {
    pub fn new(id: impl Into<SourceId>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// The message list of one source plus its read summary.
///
/// `nodes` is in arrival order. After every merge `count == nodes.len()` and
/// `unread_count <= count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageConnection {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub unread_count: usize,
    #[serde(default)]
    pub nodes: Vec<Message>,
    #[serde(default)]
    pub last_read_cursor: Option<Cursor>,
}

impl MessageConnection {
    /// Build a fully-read connection over `nodes`.
    #[must_use]
    pub fn from_nodes(nodes: Vec<Message>) -> Self {
        Self {
            count: nodes.len(),
            unread_count: 0,
            nodes,
            last_read_cursor: None,
        }
    }

    #[must_use]
    pub fn position_of(&self, id: &super::MessageId) -> Option<usize> {
        self.nodes.iter().position(|m| &m.id == id)
    }

    /// Describe the first broken summary invariant, if any.
    #[must_use]
    pub fn invariant_violation(&self) -> Option<String> {
        if self.count != self.nodes.len() {
            return Some(format!(
                "count {} does not match {} nodes",
                self.count,
                self.nodes.len()
            ));
        }
        if self.unread_count > self.count {
            return Some(format!(
                "unread_count {} exceeds count {}",
                self.unread_count, self.count
            ));
        }
        None
    }
}

/// A log source and its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub kind: SourceKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub messages: MessageConnection,
}

impl Source {
    pub fn new(id: impl Into<SourceId>, kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            messages: MessageConnection::default(),
        }
    }

    #[must_use]
    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            id: self.id.clone(),
            kind: self.kind,
        }
    }
}
