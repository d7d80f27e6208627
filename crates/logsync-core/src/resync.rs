//! Full-resync escalation.
//!
//! [`ResyncGate`] lets at most one resync run at a time. Requests that arrive
//! while one is in flight fold into it. The result is loaded into the store
//! unless the store was disposed in the meantime.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::merge::ResyncTrigger;
use crate::model::InitialState;
use crate::store::EntityStore;
use crate::timing;

/// Fetches the complete state from the server.
#[async_trait]
pub trait Resyncer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SyncError::ResyncFailed`] when the fetch fails.
    async fn full_resync(&self) -> Result<InitialState, SyncError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncStats {
    pub completed: u64,
    pub failed: u64,
    pub discarded: u64,
}

struct GateInner {
    store: Arc<EntityStore>,
    resyncer: Arc<dyn Resyncer>,
    in_flight: AtomicBool,
    done: Notify,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl GateInner {
    fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run(&self) {
        let started = Instant::now();
        match self.resyncer.full_resync().await {
            Ok(state) => {
                if self.store.load(state) {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    info!(elapsed_ms = started.elapsed().as_millis(), "full resync loaded");
                } else {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!("resync result arrived after teardown, discarded");
                }
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(code = %err.code(), error = %err, "full resync failed");
            }
        }
        timing::record_since("resync", started);
        self.in_flight.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

/// Coalescing front for a [`Resyncer`]. Clones share one gate.
#[derive(Clone)]
pub struct ResyncGate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for ResyncGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResyncGate")
            .field("in_flight", &self.in_flight())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResyncGate {
    pub fn new(store: Arc<EntityStore>, resyncer: Arc<dyn Resyncer>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                store,
                resyncer,
                in_flight: AtomicBool::new(false),
                done: Notify::new(),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> ResyncStats {
        ResyncStats {
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Resync and wait for the store to reflect it.
    ///
    /// If a resync is already in flight this waits for that one instead of
    /// starting another. Returns `true` when this call ran the resync.
    pub async fn resync(&self) -> bool {
        let finished = self.inner.done.notified();
        if self.inner.try_claim() {
            self.inner.run().await;
            return true;
        }
        if self.in_flight() {
            finished.await;
        }
        false
    }
}

impl ResyncTrigger for ResyncGate {
    fn request_resync(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("resync requested outside a runtime, ignored");
            return false;
        };
        if !self.inner.try_claim() {
            debug!("resync already in flight, request coalesced");
            return false;
        }
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move { inner.run().await });
        true
    }
}
