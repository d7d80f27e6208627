//! Push-channel contract and an in-process implementation.
//!
//! A channel is opened with the last resume cursor and yields events in
//! server order. Dropping the stream closes the subscription.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SyncError;
use crate::event::Event;
use crate::model::Cursor;

pub type EventStream = BoxStream<'static, Result<Event, SyncError>>;

/// Opens subscriptions to the server's event log.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribe to events after `resume` (from the start when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelFailure`] if the subscription cannot be
    /// established.
    async fn open(&self, resume: Option<Cursor>) -> Result<EventStream, SyncError>;
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// Sending half of one queued [`MemoryEventSource`] subscription.
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    tx: mpsc::Sender<Result<Event, SyncError>>,
}

impl MemoryFeed {
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelFailure`] once the subscriber is gone.
    pub async fn send(&self, event: Event) -> Result<(), SyncError> {
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| SyncError::channel("subscriber dropped"))
    }

    /// Deliver a transport error to the subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelFailure`] once the subscriber is gone.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), SyncError> {
        self.tx
            .send(Err(SyncError::channel(reason)))
            .await
            .map_err(|_| SyncError::channel("subscriber dropped"))
    }

    /// True when everything sent so far has been taken by the subscriber.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.tx.capacity() == self.tx.max_capacity()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// [`EventSource`] whose subscriptions are fed from in-process channels.
///
/// Each [`connect`](Self::connect) queues one subscription; each `open`
/// consumes the oldest. Opening with nothing queued fails like a refused
/// connection.
#[derive(Debug, Default)]
pub struct MemoryEventSource {
    queued: Mutex<VecDeque<mpsc::Receiver<Result<Event, SyncError>>>>,
    opened_with: Mutex<Vec<Option<Cursor>>>,
}

impl MemoryEventSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a subscription buffering up to `capacity` events.
    #[must_use]
    pub fn connect(&self, capacity: usize) -> MemoryFeed {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.queued.lock().push_back(rx);
        MemoryFeed { tx }
    }

    /// Resume cursors passed to every `open` so far.
    #[must_use]
    pub fn open_history(&self) -> Vec<Option<Cursor>> {
        self.opened_with.lock().clone()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn open(&self, resume: Option<Cursor>) -> Result<EventStream, SyncError> {
        self.opened_with.lock().push(resume.clone());
        let rx = self
            .queued
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::channel("connection refused"))?;
        debug!(resume = ?resume, "memory subscription opened");
        let events = stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(events.boxed())
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Doubling delay between resubscription attempts, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; the following call returns double.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub const fn reset(&mut self) {
        self.current = self.initial;
    }
}
