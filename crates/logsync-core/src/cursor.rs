//! Read/unread decisions for incoming messages.
//!
//! A message counts as read on arrival only when the application is in the
//! foreground and the message's source is one of the visible sections.
//! Everything else bumps the source's unread count.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crate::model::{Cursor, SourceId, SourceKind};
use crate::view::ProjectView;

/// Whether the embedding application is currently in front of the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    Foreground,
    #[default]
    Background,
}

impl Visibility {
    #[must_use]
    pub const fn from_hidden(hidden: bool) -> Self {
        if hidden {
            Self::Background
        } else {
            Self::Foreground
        }
    }
}

/// Settable visibility flag shared between the embedder and the merge engine.
///
/// Clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct VisibilitySignal {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilitySignal {
    #[must_use]
    pub fn new(initial: Visibility) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, visibility: Visibility) {
        self.tx.send_replace(visibility);
    }

    #[must_use]
    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// Receiver that observes every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new(Visibility::default())
    }
}

/// What to do with the read summary when a message arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadDecision {
    /// The user saw it: move the last-read cursor here.
    AdvanceTo(Cursor),
    /// Count it as unread.
    LeaveUnread,
}

impl ReadDecision {
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::AdvanceTo(_))
    }
}

#[must_use]
pub fn decide(
    view: &ProjectView,
    visibility: Visibility,
    source_id: &SourceId,
    cursor: &Cursor,
) -> ReadDecision {
    match visibility {
        Visibility::Foreground if view.contains(source_id) => {
            ReadDecision::AdvanceTo(cursor.clone())
        }
        Visibility::Foreground | Visibility::Background => ReadDecision::LeaveUnread,
    }
}

/// A last-read position reported to peer viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastReadUpdate {
    pub source_id: SourceId,
    pub source_kind: SourceKind,
    pub cursor: Cursor,
}

/// Receives last-read advances so other viewers can mirror them.
///
/// Called synchronously from the merge; implementations that talk to the
/// network should hand off to their own task.
pub trait LastReadSink: Send + Sync {
    fn last_read(&self, update: &LastReadUpdate);
}

/// Sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LastReadSink for NoopSink {
    fn last_read(&self, _update: &LastReadUpdate) {}
}

/// Sink that keeps every update in memory.
#[derive(Debug, Default)]
pub struct LastReadLog {
    updates: Mutex<Vec<LastReadUpdate>>,
}

impl LastReadLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn updates(&self) -> Vec<LastReadUpdate> {
        self.updates.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.lock().is_empty()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<LastReadUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }
}

impl LastReadSink for LastReadLog {
    fn last_read(&self, update: &LastReadUpdate) {
        self.updates.lock().push(update.clone());
    }
}
