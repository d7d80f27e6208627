//! Normalized in-memory store shared by the push and poll writers.
//!
//! Sources are keyed by `(SourceKind, SourceId)`. Each stored source carries a
//! revision drawn from one store-wide counter, so a compare-and-swap write
//! can tell whether anything touched the record since it was read, including
//! a full reload in between.
//!
//! Writes never create records. The only way to add a source is
//! [`EntityStore::load`], which the initial fetch and every full resync go
//! through.

pub mod patch;

pub use patch::{SnapshotPatch, SourcePatch};

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::model::{
    Cursor, InitialState, LayoutState, ProjectSnapshot, Source, SourceId, SourceKind,
};

/// Result of a read: either the record or an explicit miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Miss,
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Miss => None,
        }
    }

    #[must_use]
    pub const fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// A source as read from the store, with the revision to compare against on
/// write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub source: Source,
    pub revision: u64,
}

/// Outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { revision: u64 },
    /// The target record does not exist. Nothing was created.
    Miss,
    /// The record changed since `expected`; nothing was written.
    Conflict { expected: u64, current: u64 },
    /// The store was torn down.
    Disposed,
}

impl WriteOutcome {
    #[must_use]
    pub const fn is_written(self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Light per-source view used for section selection and titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub id: SourceId,
    pub kind: SourceKind,
    pub name: String,
    pub count: usize,
    pub unread_count: usize,
    pub last_read_cursor: Option<Cursor>,
}

impl From<&Source> for SourceSummary {
    fn from(source: &Source) -> Self {
        Self {
            id: source.id.clone(),
            kind: source.kind,
            name: source.name.clone(),
            count: source.messages.count,
            unread_count: source.messages.unread_count,
            last_read_cursor: source.messages.last_read_cursor.clone(),
        }
    }
}

#[derive(Debug)]
struct StoredSource {
    source: Source,
    revision: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    snapshot: Option<ProjectSnapshot>,
    snapshot_revision: u64,
    // Insertion order is the server's source order.
    sources: Vec<StoredSource>,
    index: HashMap<(SourceKind, SourceId), usize>,
    resume_cursor: Option<Cursor>,
    next_revision: u64,
    generation: u64,
    disposed: bool,
}

impl StoreInner {
    const fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    fn slot(&self, id: &SourceId, kind: SourceKind) -> Option<usize> {
        self.index.get(&(kind, id.clone())).copied()
    }
}

/// The normalized client-side cache.
///
/// All methods take `&self`; share the store as an `Arc<EntityStore>`.
#[derive(Debug, Default)]
pub struct EntityStore {
    inner: RwLock<StoreInner>,
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store already loaded with `state`.
    #[must_use]
    pub fn from_initial(state: InitialState) -> Self {
        let store = Self::new();
        store.load(state);
        store
    }

    /// Replace every source, the snapshot and the resume cursor.
    ///
    /// Returns `false` (and changes nothing) once the store is disposed.
    pub fn load(&self, state: InitialState) -> bool {
        let mut inner = self.inner.write();
        if inner.disposed {
            debug!("load after dispose ignored");
            return false;
        }

        let mut sources = Vec::with_capacity(state.sources.len());
        let mut index = HashMap::with_capacity(state.sources.len());
        for source in state.sources {
            let key = (source.kind, source.id.clone());
            let revision = inner.bump();
            if let Some(&slot) = index.get(&key) {
                // Later duplicates of the same identity replace earlier ones.
                sources[slot] = StoredSource { source, revision };
            } else {
                index.insert(key, sources.len());
                sources.push(StoredSource { source, revision });
            }
        }

        inner.sources = sources;
        inner.index = index;
        inner.snapshot = Some(state.snapshot);
        inner.snapshot_revision = inner.bump();
        inner.resume_cursor = state.last_cursor;
        inner.generation += 1;
        info!(
            sources = inner.sources.len(),
            generation = inner.generation,
            "store loaded"
        );
        true
    }

    #[must_use]
    pub fn read_source(&self, id: &SourceId, kind: SourceKind) -> Lookup<SourceRecord> {
        let inner = self.inner.read();
        if inner.disposed {
            return Lookup::Miss;
        }
        inner.slot(id, kind).map_or(Lookup::Miss, |slot| {
            let stored = &inner.sources[slot];
            Lookup::Found(SourceRecord {
                source: stored.source.clone(),
                revision: stored.revision,
            })
        })
    }

    /// Merge `patch` into an existing source regardless of its revision.
    pub fn write_source(&self, id: &SourceId, kind: SourceKind, patch: SourcePatch) -> WriteOutcome {
        self.write_source_inner(id, kind, None, patch)
    }

    /// Merge `patch` into an existing source only if its revision still
    /// equals `expected_revision`.
    pub fn compare_and_write_source(
        &self,
        id: &SourceId,
        kind: SourceKind,
        expected_revision: u64,
        patch: SourcePatch,
    ) -> WriteOutcome {
        self.write_source_inner(id, kind, Some(expected_revision), patch)
    }

    fn write_source_inner(
        &self,
        id: &SourceId,
        kind: SourceKind,
        expected: Option<u64>,
        patch: SourcePatch,
    ) -> WriteOutcome {
        let mut inner = self.inner.write();
        if inner.disposed {
            return WriteOutcome::Disposed;
        }
        let Some(slot) = inner.slot(id, kind) else {
            return WriteOutcome::Miss;
        };
        let current = inner.sources[slot].revision;
        match expected {
            Some(expected) if expected != current => {
                return WriteOutcome::Conflict { expected, current };
            }
            _ => {}
        }
        let revision = inner.bump();
        let stored = &mut inner.sources[slot];
        patch.apply_to(&mut stored.source.messages);
        stored.revision = revision;
        WriteOutcome::Written { revision }
    }

    #[must_use]
    pub fn read_snapshot(&self) -> Lookup<ProjectSnapshot> {
        let inner = self.inner.read();
        if inner.disposed {
            return Lookup::Miss;
        }
        inner
            .snapshot
            .clone()
            .map_or(Lookup::Miss, Lookup::Found)
    }

    /// Merge `patch` into the project snapshot.
    ///
    /// The snapshot is a singleton, so a write before any load starts from
    /// the default snapshot instead of missing.
    pub fn write_snapshot(&self, patch: SnapshotPatch) -> WriteOutcome {
        let mut inner = self.inner.write();
        if inner.disposed {
            return WriteOutcome::Disposed;
        }
        let revision = inner.bump();
        let snapshot = inner.snapshot.get_or_insert_with(ProjectSnapshot::default);
        patch.apply_to(snapshot);
        inner.snapshot_revision = revision;
        WriteOutcome::Written { revision }
    }

    /// The layout from the snapshot, or the empty layout before any load.
    #[must_use]
    pub fn layout(&self) -> LayoutState {
        let inner = self.inner.read();
        inner
            .snapshot
            .as_ref()
            .map(|s| s.layout.clone())
            .unwrap_or_default()
    }

    /// Clones of every source in server order.
    #[must_use]
    pub fn sources(&self) -> Vec<Source> {
        let inner = self.inner.read();
        if inner.disposed {
            return Vec::new();
        }
        inner.sources.iter().map(|s| s.source.clone()).collect()
    }

    /// Summaries of every source in server order, without cloning messages.
    #[must_use]
    pub fn summaries(&self) -> Vec<SourceSummary> {
        let inner = self.inner.read();
        if inner.disposed {
            return Vec::new();
        }
        inner
            .sources
            .iter()
            .map(|s| SourceSummary::from(&s.source))
            .collect()
    }

    #[must_use]
    pub fn resume_cursor(&self) -> Option<Cursor> {
        self.inner.read().resume_cursor.clone()
    }

    /// Record the cursor of the last handled event. Returns `false` after
    /// dispose.
    pub fn set_resume_cursor(&self, cursor: Cursor) -> bool {
        let mut inner = self.inner.write();
        if inner.disposed {
            return false;
        }
        inner.resume_cursor = Some(cursor);
        true
    }

    /// Highest revision handed out so far. Any write or load raises it.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.read().next_revision
    }

    /// Number of completed loads.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Tear the store down. Reads miss and writes report
    /// [`WriteOutcome::Disposed`] from here on.
    pub fn dispose(&self) {
        let mut inner = self.inner.write();
        if !inner.disposed {
            inner.disposed = true;
            inner.sources.clear();
            inner.index.clear();
            inner.snapshot = None;
            info!("store disposed");
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.read().disposed
    }
}
