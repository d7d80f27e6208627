use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use logsync_core::cursor::{LastReadLog, LastReadUpdate, Visibility, VisibilitySignal};
use logsync_core::event::Event;
use logsync_core::merge::{MergeEngine, MergeOutcome, RefreshTrigger, ResyncTrigger};
use logsync_core::model::InitialState;
use logsync_core::store::EntityStore;

/// Trigger that only records requests; the simulator services them between
/// rounds.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    pending: AtomicBool,
    requests: AtomicU64,
}

impl RecordingTrigger {
    fn fire(&self) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed);
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Clear the pending flag, returning whether anything was pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Every request, including ones folded into a pending one.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl ResyncTrigger for RecordingTrigger {
    fn request_resync(&self) -> bool {
        self.fire()
    }
}

impl RefreshTrigger for RecordingTrigger {
    fn refresh_now(&self) -> bool {
        self.fire()
    }
}

/// What one merge did, with the store observations the oracle needs.
#[derive(Debug, Clone)]
pub struct Applied {
    pub outcome: MergeOutcome,
    pub revision_before: u64,
    pub revision_after: u64,
    pub generation: u64,
    /// Whether the owning source was cached before the merge.
    pub owner_cached: bool,
    pub visibility: Visibility,
    /// Last-read advances reported during this merge.
    pub read_updates: Vec<LastReadUpdate>,
    pub resync_pending_before: bool,
    /// Whether the merge asked for a snapshot refresh.
    pub refresh_requested: bool,
}

/// Client side of the simulation: the real store and merge engine.
#[derive(Debug)]
pub struct SimulatedClient {
    store: Arc<EntityStore>,
    engine: MergeEngine,
    visibility: VisibilitySignal,
    resync: Arc<RecordingTrigger>,
    refresh: Arc<RecordingTrigger>,
    reads: Arc<LastReadLog>,
}

impl SimulatedClient {
    #[must_use]
    pub fn new(initial: InitialState) -> Self {
        let store = Arc::new(EntityStore::from_initial(initial));
        let visibility = VisibilitySignal::new(Visibility::Foreground);
        let resync = Arc::new(RecordingTrigger::default());
        let refresh = Arc::new(RecordingTrigger::default());
        let reads = Arc::new(LastReadLog::new());
        let engine = MergeEngine::new(
            Arc::clone(&store),
            visibility.clone(),
            Arc::clone(&resync) as Arc<dyn ResyncTrigger>,
            Arc::clone(&refresh) as Arc<dyn RefreshTrigger>,
        )
        .with_sink(Arc::clone(&reads) as _);
        Self {
            store,
            engine,
            visibility,
            resync,
            refresh,
            reads,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility.current()
    }

    pub fn toggle_visibility(&self) -> Visibility {
        let next = match self.visibility.current() {
            Visibility::Foreground => Visibility::Background,
            Visibility::Background => Visibility::Foreground,
        };
        self.visibility.set(next);
        next
    }

    #[must_use]
    pub const fn resync_trigger(&self) -> &Arc<RecordingTrigger> {
        &self.resync
    }

    #[must_use]
    pub const fn refresh_trigger(&self) -> &Arc<RecordingTrigger> {
        &self.refresh
    }

    pub fn apply(&mut self, event: &Event) -> Applied {
        let owner = event.owner();
        let owner_cached = !self.store.read_source(&owner.id, owner.kind).is_miss();
        let revision_before = self.store.revision();
        let resync_pending_before = self.resync.is_pending();
        let visibility = self.visibility.current();
        let refreshes_before = self.refresh.requests();

        let outcome = self.engine.apply(event);

        Applied {
            outcome,
            revision_before,
            revision_after: self.store.revision(),
            generation: self.store.generation(),
            owner_cached,
            visibility,
            read_updates: self.reads.drain(),
            resync_pending_before,
            refresh_requested: self.refresh.requests() > refreshes_before,
        }
    }

    /// Service a pending resync by reloading `state`. Returns `false` when no
    /// resync was requested.
    pub fn service_resync(&self, state: InitialState) -> bool {
        if !self.resync.take() {
            return false;
        }
        self.store.load(state)
    }
}
