use std::fmt;
use std::path::PathBuf;

use crate::model::{SourceId, SourceKind};

/// Machine-readable error codes for operators and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidConfig,
    CacheMiss,
    ChannelFailure,
    PollFailed,
    ResyncFailed,
    SessionDisposed,
    DecodeFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::InvalidConfig => "E1003",
            Self::CacheMiss => "E2001",
            Self::ChannelFailure => "E3001",
            Self::PollFailed => "E3002",
            Self::ResyncFailed => "E3003",
            Self::SessionDisposed => "E4001",
            Self::DecodeFailed => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Invalid configuration value",
            Self::CacheMiss => "Source missing from the local cache",
            Self::ChannelFailure => "Push channel failed",
            Self::PollFailed => "Snapshot poll failed",
            Self::ResyncFailed => "Full resync failed",
            Self::SessionDisposed => "Session already torn down",
            Self::DecodeFailed => "Input decode failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .logsync/config.toml and retry."),
            Self::InvalidConfig => {
                Some("Use a non-zero poll interval and initial_backoff_ms <= max_backoff_ms.")
            }
            Self::CacheMiss => None,
            Self::ChannelFailure => Some("The session resubscribes automatically after a resync."),
            Self::PollFailed => Some("The next poll tick retries; check the snapshot source."),
            Self::ResyncFailed => Some("The next cache miss retries the resync."),
            Self::SessionDisposed => Some("Start a new session."),
            Self::DecodeFailed => Some("Each input line must be one JSON event object."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by the synchronization engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The owning source of an event is not in the store. Recovered by
    /// escalating to a full resync.
    #[error("no {kind} source {id} in the cache")]
    CacheMiss { kind: SourceKind, id: SourceId },

    #[error("push channel failed: {reason}")]
    ChannelFailure { reason: String },

    #[error("snapshot poll failed: {reason}")]
    PollFailed { reason: String },

    #[error("full resync failed: {reason}")]
    ResyncFailed { reason: String },

    /// The store was torn down; late callbacks land here.
    #[error("session disposed")]
    Disposed,

    #[error("config error in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    /// `line` is 1-based; 0 means the input was a single JSON document.
    #[error("decode error at line {line}: {reason}")]
    Decode { line: usize, reason: String },
}

impl SyncError {
    /// The stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CacheMiss { .. } => ErrorCode::CacheMiss,
            Self::ChannelFailure { .. } => ErrorCode::ChannelFailure,
            Self::PollFailed { .. } => ErrorCode::PollFailed,
            Self::ResyncFailed { .. } => ErrorCode::ResyncFailed,
            Self::Disposed => ErrorCode::SessionDisposed,
            Self::Config { .. } => ErrorCode::ConfigParseError,
            Self::Decode { .. } => ErrorCode::DecodeFailed,
        }
    }

    pub fn channel(reason: impl Into<String>) -> Self {
        Self::ChannelFailure {
            reason: reason.into(),
        }
    }

    pub fn poll(reason: impl Into<String>) -> Self {
        Self::PollFailed {
            reason: reason.into(),
        }
    }

    pub fn resync(reason: impl Into<String>) -> Self {
        Self::ResyncFailed {
            reason: reason.into(),
        }
    }
}
