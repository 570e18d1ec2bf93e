//! Typed in-process publish/subscribe over bounded channels
//!
//! Two delivery disciplines, chosen per topic:
//!
//! * [`Topic`]: ring-buffered fan-out. When a topic is full the oldest
//!   event is dropped; a subscriber that falls behind by more than the
//!   buffer receives a [`BusEvent::Gap`] and must recover by re-reading
//!   latest state. Used for metrics and health snapshots.
//! * [`PlanQueue`]: bounded single-consumer queue whose publisher awaits
//!   when full. Used for recovery plans, which must never be dropped.
//!
//! Delivery is in publish order per topic; nothing is guaranteed across
//! topics.

use crate::types::{HealthSnapshot, Incident, RecoveryRecord};
use tokio::sync::{broadcast, mpsc};

/// Event delivered to a topic subscriber
#[derive(Debug, Clone)]
pub enum BusEvent<T> {
    Item(T),
    /// The subscriber lagged and `missed` events were discarded
    Gap { missed: u64 },
}

/// Ring-buffered broadcast topic with drop-oldest overflow
#[derive(Debug, Clone)]
pub struct Topic<T: Clone> {
    tx: broadcast::Sender<T>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Topic { tx, capacity: capacity.max(1) }
    }

    /// Publish without blocking. With no subscribers the event is discarded,
    /// which is acceptable for metric-class topics.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription { rx: self.tx.subscribe() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Subscriber half of a [`Topic`]
#[derive(Debug)]
pub struct Subscription<T: Clone> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Receive the next event. Returns `None` once the topic is closed and
    /// the backlog is drained.
    pub async fn recv(&mut self) -> Option<BusEvent<T>> {
        match self.rx.recv().await {
            Ok(item) => Some(BusEvent::Item(item)),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(BusEvent::Gap { missed }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking receive, for drain loops during shutdown
    pub fn try_recv(&mut self) -> Option<BusEvent<T>> {
        match self.rx.try_recv() {
            Ok(item) => Some(BusEvent::Item(item)),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Some(BusEvent::Gap { missed })
            }
            Err(_) => None,
        }
    }
}

/// Bounded queue whose publisher awaits when the buffer is full
#[derive(Debug)]
pub struct PlanQueue<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> PlanQueue<T> {
    pub fn new(capacity: usize) -> (Self, PlanReceiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (PlanQueue { tx }, PlanReceiver { rx })
    }

    /// Publish, awaiting while the queue is at capacity. Errors only when
    /// the consumer is gone.
    pub async fn publish(&self, item: T) -> crate::Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| crate::Error::Internal("plan queue consumer dropped".to_string()))
    }
}

impl<T> Clone for PlanQueue<T> {
    fn clone(&self) -> Self {
        PlanQueue { tx: self.tx.clone() }
    }
}

/// Consumer half of a [`PlanQueue`]
#[derive(Debug)]
pub struct PlanReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> PlanReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// The control plane's named topics
#[derive(Debug, Clone)]
pub struct EventBus {
    pub health: Topic<HealthSnapshot>,
    pub incidents: Topic<Incident>,
    pub recoveries: Topic<RecoveryRecord>,
}

impl EventBus {
    pub fn new(health_capacity: usize, incident_capacity: usize, recovery_capacity: usize) -> Self {
        EventBus {
            health: Topic::new(health_capacity),
            incidents: Topic::new(incident_capacity),
            recoveries: Topic::new(recovery_capacity),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64, 256, 256)
    }
}
