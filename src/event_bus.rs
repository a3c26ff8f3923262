//! Broadcast of ride lifecycle events to subscribed drivers.
//!
//! Membership lives behind a short mutex as an immutable `Arc<[..]>`. A publish
//! clones the current slice and delivers outside the lock, so subscribers may
//! join or leave (even from inside their own handler) while a broadcast runs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::DeliveryError;
use crate::request::RideRequest;
use crate::types::DriverName;

pub type SubscriberId = u64;

/// Lifecycle events for a single ride request.
#[derive(Clone, Debug)]
pub enum RideEvent {
    Requested(Arc<RideRequest>),
    Accepted {
        request: Arc<RideRequest>,
        driver: DriverName,
    },
    Cancelled {
        request: Arc<RideRequest>,
        reason: String,
    },
}

impl RideEvent {
    /// The request this event concerns.
    pub fn request(&self) -> &Arc<RideRequest> {
        match self {
            RideEvent::Requested(request)
            | RideEvent::Accepted { request, .. }
            | RideEvent::Cancelled { request, .. } => request,
        }
    }

    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RideEvent::Requested(_) => "requested",
            RideEvent::Accepted { .. } => "accepted",
            RideEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// Receiver side of the bus.
///
/// `deliver` is called on the publisher's thread and must not block; a
/// subscriber that does real work hands the event off to its own thread.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, event: &RideEvent) -> Result<(), DeliveryError>;
}

/// Per-broadcast delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

type Entry = (SubscriberId, Arc<dyn Subscriber>);

pub struct EventBus {
    subscribers: Mutex<Arc<[Entry]>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Arc::from(Vec::<Entry>::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber for future broadcasts.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.subscribers.lock().expect("subscriber mutex poisoned");
        let mut next: Vec<Entry> = guard.iter().cloned().collect();
        tracing::debug!(subscriber = subscriber.name(), id, "subscribed");
        next.push((id, subscriber));
        *guard = Arc::from(next);
        id
    }

    /// Remove a subscriber; returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.subscribers.lock().expect("subscriber mutex poisoned");
        if !guard.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<Entry> = guard
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *guard = Arc::from(next);
        tracing::debug!(id, "unsubscribed");
        true
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<[Entry]> {
        let guard = self.subscribers.lock().expect("subscriber mutex poisoned");
        Arc::clone(&guard)
    }

    /// Deliver `event` to every subscriber registered when the call begins.
    ///
    /// A subscriber that errors or panics is logged and skipped.
    pub fn publish(&self, event: &RideEvent) -> DeliveryReport {
        let snapshot = self.snapshot();
        let mut report = DeliveryReport::default();
        for (id, subscriber) in snapshot.iter() {
            match catch_unwind(AssertUnwindSafe(|| subscriber.deliver(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::warn!(
                        subscriber = subscriber.name(),
                        id,
                        event = event.kind(),
                        error = %err,
                        "event delivery failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(
                        subscriber = subscriber.name(),
                        id,
                        event = event.kind(),
                        "subscriber panicked during delivery"
                    );
                }
            }
        }
        tracing::trace!(
            event = event.kind(),
            request_id = event.request().id(),
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
