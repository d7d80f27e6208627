//! Wires the push consumer, the poll scheduler and the resync gate around
//! one store.
//!
//! One task consumes the push channel and runs every merge to completion.
//! When the channel errors or ends, the session resyncs, waits out a backoff
//! and resubscribes from the store's resume cursor. The poll scheduler and
//! the resync gate run their own tasks against the same store.

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::channel::{Backoff, EventSource, EventStream};
use crate::config::SyncConfig;
use crate::cursor::{LastReadSink, NoopSink, VisibilitySignal};
use crate::merge::{MergeEngine, MergeOutcome};
use crate::poll::{PollScheduler, SnapshotSource};
use crate::resync::{ResyncGate, ResyncStats, Resyncer};
use crate::store::EntityStore;

/// Everything a session needs. The store should already hold the initial
/// fetch.
pub struct SessionParts {
    pub config: SyncConfig,
    pub store: Arc<EntityStore>,
    pub events: Arc<dyn EventSource>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub resyncer: Arc<dyn Resyncer>,
    pub visibility: VisibilitySignal,
    pub sink: Arc<dyn LastReadSink>,
}

impl SessionParts {
    pub fn new(
        config: SyncConfig,
        store: Arc<EntityStore>,
        events: Arc<dyn EventSource>,
        snapshots: Arc<dyn SnapshotSource>,
        resyncer: Arc<dyn Resyncer>,
    ) -> Self {
        Self {
            config,
            store,
            events,
            snapshots,
            resyncer,
            visibility: VisibilitySignal::default(),
            sink: Arc::new(NoopSink),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub events: u64,
    pub appended: u64,
    pub removed: u64,
    pub ignored: u64,
    pub escalations: u64,
    pub opens: u64,
    pub channel_failures: u64,
    pub polls: u64,
    pub resyncs: ResyncStats,
}

#[derive(Debug, Default)]
struct Counters {
    events: AtomicU64,
    appended: AtomicU64,
    removed: AtomicU64,
    ignored: AtomicU64,
    escalations: AtomicU64,
    opens: AtomicU64,
    channel_failures: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &MergeOutcome) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let bucket = match outcome {
            MergeOutcome::Appended { .. } => &self.appended,
            MergeOutcome::Removed { .. } => &self.removed,
            MergeOutcome::Duplicate { .. }
            | MergeOutcome::NotFound { .. }
            | MergeOutcome::Disposed => &self.ignored,
            MergeOutcome::Escalated { .. } => &self.escalations,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }
}

enum Drained {
    Shutdown,
    Failed(String),
}

/// A running synchronization session.
pub struct SyncSession {
    store: Arc<EntityStore>,
    scheduler: Arc<PollScheduler>,
    gate: ResyncGate,
    visibility: VisibilitySignal,
    shutdown: watch::Sender<bool>,
    consumer: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SyncSession {
    /// Start the push consumer and, when enabled, the poll cadence.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(parts: SessionParts) -> Self {
        let SessionParts {
            config,
            store,
            events,
            snapshots,
            resyncer,
            visibility,
            sink,
        } = parts;

        let scheduler = Arc::new(PollScheduler::new(Arc::clone(&store), snapshots));
        if config.poll.enabled {
            scheduler.start(config.poll_interval());
        }
        let gate = ResyncGate::new(Arc::clone(&store), resyncer);
        let engine = MergeEngine::new(
            Arc::clone(&store),
            visibility.clone(),
            Arc::new(gate.clone()),
            scheduler.clone(),
        )
        .with_sink(sink);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let consumer = Consumer {
            engine,
            events,
            gate: gate.clone(),
            backoff: Backoff::new(config.initial_backoff(), config.max_backoff()),
            shutdown: shutdown_rx,
            counters: Arc::clone(&counters),
        };
        let handle = tokio::spawn(consumer.run());
        info!(
            poll = config.poll.enabled,
            interval_ms = config.poll.interval_ms,
            "sync session started"
        );

        Self {
            store,
            scheduler,
            gate,
            visibility,
            shutdown,
            consumer: Some(handle),
            counters,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub const fn visibility(&self) -> &VisibilitySignal {
        &self.visibility
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let c = &self.counters;
        SessionStats {
            events: c.events.load(Ordering::Relaxed),
            appended: c.appended.load(Ordering::Relaxed),
            removed: c.removed.load(Ordering::Relaxed),
            ignored: c.ignored.load(Ordering::Relaxed),
            escalations: c.escalations.load(Ordering::Relaxed),
            opens: c.opens.load(Ordering::Relaxed),
            channel_failures: c.channel_failures.load(Ordering::Relaxed),
            polls: self.scheduler.poll_count(),
            resyncs: self.gate.stats(),
        }
    }

    /// Close the channel, stop polling and dispose the store. Callbacks that
    /// land afterwards are no-ops.
    pub async fn shutdown(mut self) -> SessionStats {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.consumer.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "push consumer ended abnormally");
            }
        }
        self.scheduler.stop();
        self.store.dispose();
        let stats = self.stats();
        info!(events = stats.events, "sync session shut down");
        stats
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(handle) = self.consumer.take() {
            handle.abort();
            self.scheduler.stop();
            self.store.dispose();
        }
    }
}

// ---------------------------------------------------------------------------
// Push consumer
// ---------------------------------------------------------------------------

struct Consumer {
    engine: MergeEngine,
    events: Arc<dyn EventSource>,
    gate: ResyncGate,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
}

impl Consumer {
    #[instrument(name = "push_consumer", skip_all)]
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let resume = self.engine.store().resume_cursor();
            let opened = tokio::select! {
                opened = self.events.open(resume.clone()) => opened,
                _ = self.shutdown.changed() => break,
            };

            let reason = match opened {
                Ok(mut stream) => {
                    self.counters.opens.fetch_add(1, Ordering::Relaxed);
                    self.backoff.reset();
                    info!(resume = ?resume, "push channel open");
                    match self.drain(&mut stream).await {
                        Drained::Shutdown => break,
                        Drained::Failed(reason) => reason,
                    }
                }
                Err(err) => err.to_string(),
            };

            self.counters.channel_failures.fetch_add(1, Ordering::Relaxed);
            let delay = self.backoff.next_delay();
            warn!(
                %reason,
                delay_ms = delay.as_millis(),
                "push channel lost, resyncing before resubscribe"
            );
            tokio::select! {
                _ = self.gate.resync() => {}
                _ = self.shutdown.changed() => break,
            }
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        info!("push consumer stopped");
    }

    async fn drain(&mut self, stream: &mut EventStream) -> Drained {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return Drained::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let outcome = self.engine.apply(&event);
                        self.counters.record(&outcome);
                    }
                    Some(Err(err)) => return Drained::Failed(err.to_string()),
                    None => return Drained::Failed("stream ended".to_string()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryEventSource;
    use crate::error::SyncError;
    use crate::event::Event;
    use crate::model::{
        Cursor, InitialState, Level, Message, MessageId, MessageKind, ProjectSnapshot, Source,
        SourceId, SourceKind, SourceRef,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct StaticSnapshot;

    #[async_trait]
    impl SnapshotSource for StaticSnapshot {
        async fn poll(&self) -> Result<ProjectSnapshot, SyncError> {
            Ok(ProjectSnapshot::default())
        }
    }

    struct StaticResync {
        state: InitialState,
    }

    #[async_trait]
    impl Resyncer for StaticResync {
        async fn full_resync(&self) -> Result<InitialState, SyncError> {
            Ok(self.state.clone())
        }
    }

    fn make_state(cursor: &str) -> InitialState {
        InitialState {
            snapshot: ProjectSnapshot::default(),
            sources: vec![Source::new("p1", SourceKind::Process, "Metro")],
            last_cursor: Some(Cursor::new(cursor)),
        }
    }

    fn make_event(cursor: &str, id: &str) -> Event {
        Event::added(
            Cursor::new(cursor),
            Message {
                id: MessageId::new(id),
                msg: String::new(),
                time: Utc::now(),
                level: Level::Info,
                kind: MessageKind::Log,
                source: SourceRef::new("p1", SourceKind::Process),
            },
        )
    }

    fn make_parts(events: Arc<MemoryEventSource>, resync_cursor: &str) -> SessionParts {
        let mut config = SyncConfig::default();
        config.poll.enabled = false;
        config.channel.initial_backoff_ms = 10;
        config.channel.max_backoff_ms = 40;
        SessionParts::new(
            config,
            Arc::new(EntityStore::from_initial(make_state("c0"))),
            events,
            Arc::new(StaticSnapshot),
            Arc::new(StaticResync {
                state: make_state(resync_cursor),
            }),
        )
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn consumer_applies_events_and_tracks_resume_cursor() {
        let events = Arc::new(MemoryEventSource::new());
        let feed = events.connect(16);
        let session = SyncSession::start(make_parts(Arc::clone(&events), "c0"));

        feed.send(make_event("c1", "m1")).await.expect("send");
        feed.send(make_event("c2", "m2")).await.expect("send");
        let store = Arc::clone(session.store());
        wait_for(|| store.resume_cursor() == Some(Cursor::new("c2"))).await;

        let stats = session.shutdown().await;
        assert_eq!(stats.appended, 2);
        assert_eq!(stats.opens, 1);
        assert_eq!(events.open_history(), vec![Some(Cursor::new("c0"))]);
        assert!(store.is_disposed());
    }

    #[tokio::test]
    async fn channel_failure_resyncs_then_resubscribes_from_fresh_cursor() {
        let events = Arc::new(MemoryEventSource::new());
        let first = events.connect(16);
        let second = events.connect(16);
        let session = SyncSession::start(make_parts(Arc::clone(&events), "c50"));

        first.send(make_event("c1", "m1")).await.expect("send");
        first.fail("connection reset").await.expect("send");
        wait_for(|| events.open_history().len() == 2).await;

        assert_eq!(
            events.open_history(),
            vec![Some(Cursor::new("c0")), Some(Cursor::new("c50"))]
        );
        second.send(make_event("c51", "m9")).await.expect("send");
        let store = Arc::clone(session.store());
        wait_for(|| store.resume_cursor() == Some(Cursor::new("c51"))).await;

        let stats = session.shutdown().await;
        assert_eq!(stats.channel_failures, 1);
        assert_eq!(stats.resyncs.completed, 1);
        assert_eq!(stats.opens, 2);
    }

    #[tokio::test]
    async fn refused_open_backs_off_and_retries() {
        let events = Arc::new(MemoryEventSource::new());
        let session = SyncSession::start(make_parts(Arc::clone(&events), "c0"));
        wait_for(|| events.open_history().len() >= 3).await;
        let stats = session.shutdown().await;
        assert!(stats.channel_failures >= 2);
        assert_eq!(stats.opens, 0);
    }

    #[tokio::test]
    async fn escalation_resyncs_through_the_gate() {
        let events = Arc::new(MemoryEventSource::new());
        let feed = events.connect(16);
        let mut parts = make_parts(Arc::clone(&events), "c7");
        parts.resyncer = Arc::new(StaticResync {
            state: InitialState {
                sources: vec![
                    Source::new("p1", SourceKind::Process, "Metro"),
                    Source::new("d1", SourceKind::Device, "Pixel"),
                ],
                last_cursor: Some(Cursor::new("c7")),
                ..InitialState::default()
            },
        });
        let session = SyncSession::start(parts);

        let mut orphan = make_event("c3", "x1");
        orphan.node.source = SourceRef::new("d1", SourceKind::Device);
        feed.send(orphan).await.expect("send");

        let store = Arc::clone(session.store());
        wait_for(|| {
            store
                .read_source(&SourceId::new("d1"), SourceKind::Device)
                .found()
                .is_some()
        })
        .await;
        let stats = session.shutdown().await;
        assert_eq!(stats.escalations, 1);
        assert_eq!(stats.resyncs.completed, 1);
    }

    #[tokio::test]
    async fn shutdown_disposes_store_for_late_callbacks() {
        let events = Arc::new(MemoryEventSource::new());
        let _feed = events.connect(1);
        let session = SyncSession::start(make_parts(Arc::clone(&events), "c0"));
        let store = Arc::clone(session.store());
        let scheduler = Arc::clone(session.scheduler());
        session.shutdown().await;

        assert!(store.is_disposed());
        assert!(!scheduler.is_running());
        assert!(!store.load(make_state("c9")));
    }
}
