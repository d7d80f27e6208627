//! logsync-core: keeps a normalized client-side cache of a project's live
//! build log in step with the server.
//!
//! Two writers feed one [`store::EntityStore`]:
//!
//! - the push channel ([`channel`]), whose events are merged one at a time by
//!   the [`merge::MergeEngine`], and
//! - the poll channel ([`poll`]), which refreshes coarse snapshot fields on a
//!   fixed cadence and on demand.
//!
//! When an event cannot be merged incrementally the engine escalates to a
//! full resync through the [`resync::ResyncGate`]. [`session::SyncSession`]
//! wires all of it together.
//!
//! # Conventions
//!
//! - **Errors**: library calls return [`error::SyncError`]; binaries wrap it in
//!   `anyhow`.
//! - **Logging**: `tracing` macros throughout; no subscriber is installed here.

pub mod channel;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod merge;
pub mod model;
pub mod poll;
pub mod resync;
pub mod session;
pub mod store;
pub mod timing;
pub mod view;

pub use error::{ErrorCode, SyncError};
pub use event::{Event, EventKind};
pub use merge::{MergeEngine, MergeOutcome};
pub use store::EntityStore;
