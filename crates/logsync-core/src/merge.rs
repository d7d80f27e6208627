//! Incremental merge of push-channel events into the store.
//!
//! Each event is handled to completion before the next one. An event whose
//! owning source is not cached cannot be merged incrementally: the engine
//! drops it and asks for a full resync instead. No partial write happens on
//! that path.
//!
//! Writes go through the store's compare-and-swap so that a snapshot poll or
//! a resync landing between our read and our write is never overwritten with
//! stale data. One conflict is retried from a fresh read; a second one
//! escalates.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cursor::{self, LastReadSink, LastReadUpdate, NoopSink, ReadDecision, VisibilitySignal};
use crate::event::{Event, EventKind};
use crate::model::{HostType, MessageKind, SourceId, SourceRef};
use crate::store::{EntityStore, Lookup, SourcePatch, WriteOutcome};
use crate::timing::timed;
use crate::view;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Requests a full resync. Returns `true` if this call started one and
/// `false` if it was folded into one already in flight.
pub trait ResyncTrigger: Send + Sync {
    fn request_resync(&self) -> bool;
}

/// Requests an out-of-cadence snapshot poll. Returns `true` if a poll was
/// queued and `false` if one was already pending.
pub trait RefreshTrigger: Send + Sync {
    fn refresh_now(&self) -> bool;
}

/// Trigger that ignores every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrigger;

impl ResyncTrigger for NoTrigger {
    fn request_resync(&self) -> bool {
        false
    }
}

impl RefreshTrigger for NoTrigger {
    fn refresh_now(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePhase {
    #[default]
    Idle,
    Merging,
    Escalating,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Merging => "merging",
            Self::Escalating => "escalating",
        })
    }
}

/// What one event did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The message was appended. `read` tells whether the last-read cursor
    /// advanced instead of the unread count.
    Appended { source: SourceId, read: bool },
    /// The message id was already present; nothing changed.
    Duplicate { source: SourceId },
    Removed { source: SourceId },
    /// A delete for a message the source does not hold; nothing changed.
    NotFound { source: SourceId },
    /// The owning source was missing or the write kept conflicting. The
    /// event was dropped and a resync requested (`requested` is `false` when
    /// it folded into one already in flight).
    Escalated { source: SourceId, requested: bool },
    /// The store was torn down.
    Disposed,
}

impl MergeOutcome {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Appended { read: true, .. } => "appended-read",
            Self::Appended { read: false, .. } => "appended-unread",
            Self::Duplicate { .. } => "duplicate",
            Self::Removed { .. } => "removed",
            Self::NotFound { .. } => "not-found",
            Self::Escalated { .. } => "escalated",
            Self::Disposed => "disposed",
        }
    }

    #[must_use]
    pub const fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalated { .. })
    }
}

/// Whether a message of `kind` should pull a fresh snapshot under `host`.
///
/// Tunnel hosts only learn their public URL once the tunnel is up; every
/// other host type learns it when the bundler starts.
#[must_use]
pub const fn triggers_refresh(kind: MessageKind, host: HostType) -> bool {
    match kind {
        MessageKind::TunnelReady => matches!(host, HostType::Tunnel),
        MessageKind::MetroInitializeStarted => !matches!(host, HostType::Tunnel),
        MessageKind::Log
        | MessageKind::MetroInitializeDone
        | MessageKind::BuildProgress
        | MessageKind::BuildFinished
        | MessageKind::BuildError
        | MessageKind::DeviceConnected
        | MessageKind::DeviceDisconnected
        | MessageKind::Other => false,
    }
}

// Attempts at the compare-and-swap write before escalating.
const WRITE_ATTEMPTS: usize = 2;

#[cfg(test)]
type WriteHook = Box<dyn Fn(&EntityStore) + Send + Sync>;

enum Step {
    Done(MergeOutcome),
    Retry,
    Escalate,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct MergeEngine {
    store: Arc<EntityStore>,
    visibility: VisibilitySignal,
    resync: Arc<dyn ResyncTrigger>,
    refresh: Arc<dyn RefreshTrigger>,
    sink: Arc<dyn LastReadSink>,
    phase: MergePhase,
    // Store generation under which this engine last recorded a resume cursor.
    cursor_generation: Option<u64>,
    // Runs between the read and the compare-and-swap write.
    #[cfg(test)]
    before_write: Option<WriteHook>,
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("phase", &self.phase)
            .field("visibility", &self.visibility.current())
            .finish_non_exhaustive()
    }
}

impl MergeEngine {
    pub fn new(
        store: Arc<EntityStore>,
        visibility: VisibilitySignal,
        resync: Arc<dyn ResyncTrigger>,
        refresh: Arc<dyn RefreshTrigger>,
    ) -> Self {
        Self {
            store,
            visibility,
            resync,
            refresh,
            sink: Arc::new(NoopSink),
            phase: MergePhase::Idle,
            cursor_generation: None,
            #[cfg(test)]
            before_write: None,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LastReadSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub const fn phase(&self) -> MergePhase {
        self.phase
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Merge one event.
    pub fn apply(&mut self, event: &Event) -> MergeOutcome {
        if self.store.is_disposed() {
            return MergeOutcome::Disposed;
        }

        if event.kind == EventKind::Added && self.refresh_due(event.node.kind) {
            let queued = self.refresh.refresh_now();
            debug!(kind = ?event.node.kind, queued, "snapshot refresh requested");
        }

        self.phase = MergePhase::Merging;
        let outcome = match event.kind {
            EventKind::Added => timed("merge.added", || self.merge_added(event)),
            EventKind::Deleted => timed("merge.deleted", || self.merge_deleted(event)),
        };
        self.phase = MergePhase::Idle;

        // A no-op after a reload is a stale replay on the old stream; it must
        // not move the resume cursor back behind the loaded one.
        let generation = self.store.generation();
        let advance = match &outcome {
            MergeOutcome::Appended { .. } | MergeOutcome::Removed { .. } => true,
            MergeOutcome::Duplicate { .. } | MergeOutcome::NotFound { .. } => {
                self.cursor_generation == Some(generation)
            }
            MergeOutcome::Escalated { .. } | MergeOutcome::Disposed => false,
        };
        if advance && self.store.set_resume_cursor(event.cursor.clone()) {
            self.cursor_generation = Some(generation);
        }
        debug!(
            cursor = %event.cursor,
            message = %event.node.id,
            outcome = outcome.label(),
            "event merged"
        );
        outcome
    }

    fn refresh_due(&self, kind: MessageKind) -> bool {
        let host = self
            .store
            .read_snapshot()
            .found()
            .map(|s| s.settings.host_type)
            .unwrap_or_default();
        triggers_refresh(kind, host)
    }

    fn merge_added(&mut self, event: &Event) -> MergeOutcome {
        let owner = event.owner();
        for _ in 0..WRITE_ATTEMPTS {
            match self.try_add(owner, event) {
                Step::Done(outcome) => return outcome,
                Step::Retry => debug!(source = %owner, "revision conflict, re-reading"),
                Step::Escalate => return self.escalate(owner),
            }
        }
        warn!(source = %owner, "write kept conflicting, escalating");
        self.escalate(owner)
    }

    fn try_add(&self, owner: &SourceRef, event: &Event) -> Step {
        let record = match self.store.read_source(&owner.id, owner.kind) {
            Lookup::Found(record) => record,
            Lookup::Miss => return Step::Escalate,
        };
        let messages = record.source.messages;
        if messages.position_of(&event.node.id).is_some() {
            return Step::Done(MergeOutcome::Duplicate {
                source: owner.id.clone(),
            });
        }

        let view = view::project_view(&self.store);
        let decision = cursor::decide(&view, self.visibility.current(), &owner.id, &event.cursor);

        let mut nodes = messages.nodes;
        nodes.push(event.node.clone());
        let count = nodes.len();
        let mut patch = SourcePatch {
            count: Some(count),
            nodes: Some(nodes),
            ..SourcePatch::default()
        };
        match &decision {
            ReadDecision::AdvanceTo(cursor) => patch.last_read_cursor = Some(cursor.clone()),
            ReadDecision::LeaveUnread => {
                patch.unread_count = Some((messages.unread_count + 1).min(count));
            }
        }

        #[cfg(test)]
        self.run_before_write();
        match self
            .store
            .compare_and_write_source(&owner.id, owner.kind, record.revision, patch)
        {
            WriteOutcome::Written { .. } => {
                let read = decision.is_read();
                if let ReadDecision::AdvanceTo(cursor) = decision {
                    self.sink.last_read(&LastReadUpdate {
                        source_id: owner.id.clone(),
                        source_kind: owner.kind,
                        cursor,
                    });
                }
                Step::Done(MergeOutcome::Appended {
                    source: owner.id.clone(),
                    read,
                })
            }
            WriteOutcome::Conflict { .. } => Step::Retry,
            WriteOutcome::Miss => Step::Escalate,
            WriteOutcome::Disposed => Step::Done(MergeOutcome::Disposed),
        }
    }

    fn merge_deleted(&mut self, event: &Event) -> MergeOutcome {
        let owner = event.owner();
        for _ in 0..WRITE_ATTEMPTS {
            match self.try_delete(owner, event) {
                Step::Done(outcome) => return outcome,
                Step::Retry => debug!(source = %owner, "revision conflict, re-reading"),
                Step::Escalate => return self.escalate(owner),
            }
        }
        warn!(source = %owner, "write kept conflicting, escalating");
        self.escalate(owner)
    }

    fn try_delete(&self, owner: &SourceRef, event: &Event) -> Step {
        let record = match self.store.read_source(&owner.id, owner.kind) {
            Lookup::Found(record) => record,
            Lookup::Miss => return Step::Escalate,
        };
        let messages = record.source.messages;
        let Some(position) = messages.position_of(&event.node.id) else {
            return Step::Done(MergeOutcome::NotFound {
                source: owner.id.clone(),
            });
        };

        let mut nodes = messages.nodes;
        nodes.remove(position);
        let count = nodes.len();
        // Unread is not decremented on delete; it is only clamped to the
        // shrunken count.
        let patch = SourcePatch {
            count: Some(count),
            unread_count: (messages.unread_count > count).then_some(count),
            nodes: Some(nodes),
            last_read_cursor: None,
        };

        #[cfg(test)]
        self.run_before_write();
        match self
            .store
            .compare_and_write_source(&owner.id, owner.kind, record.revision, patch)
        {
            WriteOutcome::Written { .. } => Step::Done(MergeOutcome::Removed {
                source: owner.id.clone(),
            }),
            WriteOutcome::Conflict { .. } => Step::Retry,
            WriteOutcome::Miss => Step::Escalate,
            WriteOutcome::Disposed => Step::Done(MergeOutcome::Disposed),
        }
    }

    #[cfg(test)]
    fn run_before_write(&self) {
        if let Some(hook) = &self.before_write {
            hook(&self.store);
        }
    }

    fn escalate(&mut self, owner: &SourceRef) -> MergeOutcome {
        self.phase = MergePhase::Escalating;
        let requested = self.resync.request_resync();
        info!(source = %owner, requested, "cache miss, escalating to full resync");
        MergeOutcome::Escalated {
            source: owner.id.clone(),
            requested,
        }
    }
}
