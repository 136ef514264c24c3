//! Notification hub
//!
//! Detectors publish [`TouchEvent`]s into one bounded inbox. A single
//! fan-out task drains the inbox and hands each event to every registered
//! sink through that sink's own queue:
//!
//! ```text
//! U2F ──┐                        ┌─> diagnostic  (unbounded)
//! GPG ──┼─> inbox ─> fan-out ────┼─> client #1   (bounded)
//! SSH ──┘   (bounded)            └─> client #2   (bounded)
//! ```
//!
//! The hand-off never waits: a bounded sink whose queue is full, or whose
//! receiver is gone, is unregistered on the spot. Because one task fans out
//! in inbox order and every sink queue is FIFO, each sink observes events
//! from a given detector in the order that detector published them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

use td_protocol::TouchEvent;

/// The hub's fan-out task has exited
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Notification hub is closed")]
pub struct HubClosed;

/// Identifier of a registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// How many undelivered events a sink may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCapacity {
    /// Dropped once this many events are queued
    Bounded(usize),
    /// Never dropped for lack of room
    Unlimited,
}

enum SinkSender {
    Bounded(mpsc::Sender<TouchEvent>),
    Unbounded(mpsc::UnboundedSender<TouchEvent>),
}

enum SinkQueue {
    Bounded(mpsc::Receiver<TouchEvent>),
    Unbounded(mpsc::UnboundedReceiver<TouchEvent>),
}

/// Input side of one sink's event stream
struct SinkHandle {
    name: String,
    tx: SinkSender,
}

/// Why a sink was unregistered during fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sink's queue was full
    Lagging,
    /// The sink's receiver was gone
    Closed,
}

/// Outcome of delivering one event
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Sinks the event was queued for
    pub delivered: usize,
    /// Sinks unregistered while delivering
    pub dropped: Vec<(String, DropReason)>,
}

/// Registry of the sinks currently receiving events
///
/// Sinks may register and unregister at any time, including while an event
/// is being fanned out; a sink registered after an event's fan-out never
/// receives that event.
pub struct SinkRegistry {
    next_id: AtomicU64,
    sinks: DashMap<SinkId, SinkHandle>,
}

impl SinkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sinks: DashMap::new(),
        }
    }

    /// Register a sink; it receives every event fanned out from now on.
    ///
    /// Dropping the returned receiver unregisters the sink.
    pub fn register(self: &Arc<Self>, name: impl Into<String>, capacity: SinkCapacity) -> SinkReceiver {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();

        let (tx, queue) = match capacity {
            SinkCapacity::Bounded(size) => {
                let (tx, rx) = mpsc::channel(size.max(1));
                (SinkSender::Bounded(tx), SinkQueue::Bounded(rx))
            }
            SinkCapacity::Unlimited => {
                let (tx, rx) = mpsc::unbounded_channel();
                (SinkSender::Unbounded(tx), SinkQueue::Unbounded(rx))
            }
        };

        self.sinks.insert(
            id,
            SinkHandle {
                name: name.clone(),
                tx,
            },
        );
        tracing::debug!("Registered sink {} ({})", name, id);

        SinkReceiver {
            id,
            name,
            queue,
            registry: Arc::clone(self),
        }
    }

    /// Remove a sink; a no-op if it is already gone
    pub fn unregister(&self, id: SinkId) -> bool {
        match self.sinks.remove(&id) {
            Some((_, handle)) => {
                tracing::debug!("Unregistered sink {} ({})", handle.name, id);
                true
            }
            None => false,
        }
    }

    /// Hand one event to every registered sink without waiting
    pub fn fan_out(&self, event: TouchEvent) -> FanOutReport {
        let mut report = FanOutReport::default();
        let mut failed = Vec::new();

        for entry in self.sinks.iter() {
            let result = match &entry.tx {
                SinkSender::Bounded(tx) => tx.try_send(event).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => DropReason::Lagging,
                    mpsc::error::TrySendError::Closed(_) => DropReason::Closed,
                }),
                SinkSender::Unbounded(tx) => tx.send(event).map_err(|_| DropReason::Closed),
            };

            match result {
                Ok(()) => report.delivered += 1,
                Err(reason) => failed.push((*entry.key(), reason)),
            }
        }

        // Removal must happen after iteration releases the shard locks
        for (id, reason) in failed {
            if let Some((_, handle)) = self.sinks.remove(&id) {
                tracing::debug!("Dropping sink {} ({}): {:?}", handle.name, id, reason);
                report.dropped.push((handle.name, reason));
            }
        }

        report
    }

    /// Number of registered sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is registered
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Names of the registered sinks, sorted by registration
    pub fn names(&self) -> Vec<String> {
        let mut entries: Vec<(SinkId, String)> = self
            .sinks
            .iter()
            .map(|entry| (*entry.key(), entry.name.clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, name)| name).collect()
    }

    /// Unregister every sink; receivers drain what is queued, then end
    pub fn clear(&self) {
        self.sinks.clear();
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Output side of one sink's event stream
pub struct SinkReceiver {
    id: SinkId,
    name: String,
    queue: SinkQueue,
    registry: Arc<SinkRegistry>,
}

impl SinkReceiver {
    /// Name given at registration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next event, or `None` once the hub dropped this sink. Cancel-safe.
    pub async fn recv(&mut self) -> Option<TouchEvent> {
        match &mut self.queue {
            SinkQueue::Bounded(rx) => rx.recv().await,
            SinkQueue::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<TouchEvent> {
        match &mut self.queue {
            SinkQueue::Bounded(rx) => rx.try_recv().ok(),
            SinkQueue::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

impl Drop for SinkReceiver {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Detector-side handle for publishing events
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<TouchEvent>,
}

impl EventPublisher {
    /// Queue an event for fan-out, waiting only while the inbox is full
    pub async fn publish(&self, event: TouchEvent) -> Result<(), HubClosed> {
        tracing::trace!("Publishing {}", event);
        self.tx.send(event).await.map_err(|_| HubClosed)
    }
}

/// Single point receiving all events and fanning them out to the sinks
pub struct NotificationHub {
    inbox_tx: mpsc::Sender<TouchEvent>,
    inbox_rx: mpsc::Receiver<TouchEvent>,
    sinks: Arc<SinkRegistry>,
}

impl NotificationHub {
    /// Create a hub whose inbox buffers `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity.max(1));
        Self {
            inbox_tx,
            inbox_rx,
            sinks: Arc::new(SinkRegistry::new()),
        }
    }

    /// A new publisher; take every publisher before calling `run`
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            tx: self.inbox_tx.clone(),
        }
    }

    /// Shared sink registry
    pub fn sinks(&self) -> Arc<SinkRegistry> {
        Arc::clone(&self.sinks)
    }

    /// Fan out events until every publisher has been dropped
    pub async fn run(self) {
        let Self {
            inbox_tx,
            mut inbox_rx,
            sinks,
        } = self;
        drop(inbox_tx);

        tracing::debug!("Notification hub started");
        while let Some(event) = inbox_rx.recv().await {
            let report = sinks.fan_out(event);
            tracing::trace!(
                "Delivered {} to {} sinks ({} dropped)",
                event,
                report.delivered,
                report.dropped.len()
            );
        }
        tracing::debug!("Notification hub stopped");
    }
}
