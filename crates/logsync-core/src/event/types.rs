//! Event kind enum for the push channel.
//!
//! The wire form uses the upper-case `ADDED` / `DELETED` tags of the
//! subscription payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message was appended to its source.
    Added,
    /// A message was removed from its source.
    Deleted,
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown event kind '{}': expected one of ADDED, DELETED",
            self.raw
        )
    }
}

impl std::error::Error for UnknownEventKind {}

impl EventKind {
    pub const ALL: [Self; 2] = [Self::Added, Self::Deleted];

    /// Return the wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADDED" => Ok(Self::Added),
            "DELETED" => Ok(Self::Deleted),
            _ => Err(UnknownEventKind { raw: s.to_string() }),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
