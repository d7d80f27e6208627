//! Normalized entities held by the [`EntityStore`](crate::store::EntityStore).
//!
//! Every record is stored once by identity: sources are keyed by
//! `(SourceKind, SourceId)`, messages live inside their owning source's
//! [`MessageConnection`], and the project-wide fields live in one
//! [`ProjectSnapshot`].

pub mod ids;
pub mod message;
pub mod snapshot;
pub mod source;

pub use ids::{Cursor, MessageId, SourceId};
pub use message::{Level, Message, MessageKind};
pub use snapshot::{
    HostType, InitialState, LayoutState, ProcessInfo, ProjectConfig, ProjectSettings,
    ProjectSnapshot, UserSettings,
};
pub use source::{MessageConnection, Source, SourceKind, SourceRef};
