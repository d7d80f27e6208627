//! Fixed-cadence snapshot polling with on-demand refreshes.
//!
//! The poll task only ever writes through [`EntityStore::write_snapshot`],
//! so it cannot clobber message lists the push channel maintains.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::merge::RefreshTrigger;
use crate::model::ProjectSnapshot;
use crate::store::{EntityStore, SnapshotPatch, WriteOutcome};
use crate::timing;

/// Fetches the current project snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SyncError::PollFailed`] when the fetch fails.
    async fn poll(&self) -> Result<ProjectSnapshot, SyncError>;
}

struct PollInner {
    store: Arc<EntityStore>,
    source: Arc<dyn SnapshotSource>,
    running: AtomicBool,
    pending: AtomicBool,
    wake: Notify,
    polls: AtomicU64,
    failures: AtomicU64,
}

impl PollInner {
    async fn refresh(&self) {
        let started = Instant::now();
        self.polls.fetch_add(1, Ordering::Relaxed);
        match self.source.poll().await {
            Ok(snapshot) => match self.store.write_snapshot(SnapshotPatch::from(snapshot)) {
                WriteOutcome::Written { revision } => debug!(revision, "snapshot refreshed"),
                WriteOutcome::Disposed => debug!("snapshot after teardown dropped"),
                other => warn!(?other, "unexpected snapshot write outcome"),
            },
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(code = %err.code(), error = %err, "snapshot poll failed");
            }
        }
        timing::record_since("poll", started);
        self.pending.store(false, Ordering::Release);
    }
}

async fn run(inner: Arc<PollInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial fetch already
    // covered it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inner.pending.swap(true, Ordering::AcqRel) {
                    // A triggered refresh is queued and will run on the wake.
                    continue;
                }
            }
            () = inner.wake.notified() => {}
        }
        inner.refresh().await;
    }
}

/// Drives [`SnapshotSource::poll`] on an interval and on demand.
pub struct PollScheduler {
    inner: Arc<PollInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("running", &self.is_running())
            .field("polls", &self.poll_count())
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    pub fn new(store: Arc<EntityStore>, source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            inner: Arc::new(PollInner {
                store,
                source,
                running: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                wake: Notify::new(),
                polls: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start polling every `interval`. Returns `false` if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }
        self.inner.running.store(true, Ordering::Release);
        self.inner.pending.store(false, Ordering::Release);
        *task = Some(tokio::spawn(run(Arc::clone(&self.inner), interval)));
        info!(interval_ms = interval.as_millis(), "poll scheduler started");
        true
    }

    /// Stop the cadence. An in-flight poll is abandoned without writing.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            self.inner.running.store(false, Ordering::Release);
            self.inner.pending.store(false, Ordering::Release);
            info!("poll scheduler stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Polls started so far, cadence and on-demand combined.
    #[must_use]
    pub fn poll_count(&self) -> u64 {
        self.inner.polls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }
}

impl RefreshTrigger for PollScheduler {
    fn refresh_now(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if self.inner.pending.swap(true, Ordering::AcqRel) {
            debug!("refresh already pending, coalesced");
            return false;
        }
        self.inner.wake.notify_one();
        true
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
