use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::MessageId;
use super::source::SourceRef;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// What a message reports. Plain log lines are `Log`; the rest mark a
/// pipeline or device phase transition. Tags this build does not know decode
/// as `Other` and merge like plain log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    Log,
    TunnelReady,
    MetroInitializeStarted,
    MetroInitializeDone,
    BuildProgress,
    BuildFinished,
    BuildError,
    DeviceConnected,
    DeviceDisconnected,
    #[serde(other)]
    Other,
}

impl MessageKind {
    pub const ALL: [Self; 10] = [
        Self::Log,
        Self::TunnelReady,
        Self::MetroInitializeStarted,
        Self::MetroInitializeDone,
        Self::BuildProgress,
        Self::BuildFinished,
        Self::BuildError,
        Self::DeviceConnected,
        Self::DeviceDisconnected,
        Self::Other,
    ];
}

/// One log message as delivered by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub msg: String,
    pub time: DateTime<Utc>,
    pub level: Level,
    #[serde(default)]
    pub kind: MessageKind,
    pub source: SourceRef,
}
