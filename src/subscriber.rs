//! Event-driven driver: a per-driver state machine fed by bus events.
//!
//! ```text
//! Idle --Requested--> AwaitingAttempt --own try_claim ok--> Won
//!                           |
//!                           +--own try_claim lost / Accepted(other)--> Lost
//!                           +--Cancelled--> Lost (abandoned)
//! ```
//!
//! Each driver owns a worker thread and an mpsc inbox. The bus only enqueues,
//! so a slow driver never stalls a broadcast. Events are advisory; the
//! request's `try_claim` decides the winner.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::DeliveryError;
use crate::event_bus::{EventBus, RideEvent, Subscriber, SubscriberId};
use crate::request::RideRequest;
use crate::types::{AttemptOutcome, DriverName, DriverReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    AwaitingAttempt,
    Won,
    Lost,
}

impl DriverState {
    /// Whether the driver is done with its request.
    pub fn is_terminal(self) -> bool {
        matches!(self, DriverState::Won | DriverState::Lost)
    }
}

/// Pure transition logic, driven by the worker loop.
pub struct DriverMachine {
    name: DriverName,
    delay: Duration,
    state: DriverState,
    active: Option<Arc<RideRequest>>,
    deadline: Option<Instant>,
    cancelled: bool,
}

impl DriverMachine {
    /// Create an idle driver with a fixed response delay.
    pub fn new(name: impl Into<DriverName>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            state: DriverState::Idle,
            active: None,
            deadline: None,
            cancelled: false,
        }
    }

    /// Driver name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Request being contended for, if any.
    pub fn active_request(&self) -> Option<&Arc<RideRequest>> {
        self.active.as_ref()
    }

    /// When the pending claim attempt is due, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once a cancellation was seen for the active request.
    pub fn finished(&self) -> bool {
        self.cancelled
    }

    fn is_active(&self, request: &Arc<RideRequest>) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, request))
    }

    /// Apply one event; returns an outcome if this event resolved the driver.
    pub fn handle(&mut self, event: &RideEvent, now: Instant) -> Option<AttemptOutcome> {
        match event {
            RideEvent::Requested(request) => {
                if self.state != DriverState::Idle {
                    tracing::debug!(driver = %self.name, request_id = request.id(), "busy, ignoring request");
                    return None;
                }
                tracing::info!(
                    driver = %self.name,
                    request_id = request.id(),
                    origin = request.origin(),
                    destination = request.destination(),
                    "received ride request"
                );
                self.active = Some(Arc::clone(request));
                // An Accepted broadcast can overtake Requested in this inbox.
                if let Some(by) = request.claimant() {
                    self.state = DriverState::Lost;
                    return Some(AttemptOutcome::AlreadyClaimed {
                        by: Some(by.to_string()),
                    });
                }
                self.deadline = Some(now + self.delay);
                self.state = DriverState::AwaitingAttempt;
                None
            }
            RideEvent::Accepted { request, driver } => {
                if !self.is_active(request) || *driver == self.name {
                    return None;
                }
                if self.state != DriverState::AwaitingAttempt {
                    return None;
                }
                tracing::info!(driver = %self.name, by = %driver, "ride accepted elsewhere, standing down");
                self.state = DriverState::Lost;
                self.deadline = None;
                Some(AttemptOutcome::AlreadyClaimed {
                    by: Some(driver.clone()),
                })
            }
            RideEvent::Cancelled { request, reason } => {
                if !self.is_active(request) {
                    return None;
                }
                self.cancelled = true;
                tracing::info!(driver = %self.name, reason = %reason, "ride cancelled");
                if self.state == DriverState::AwaitingAttempt {
                    self.state = DriverState::Lost;
                    self.deadline = None;
                    return Some(AttemptOutcome::Abandoned);
                }
                None
            }
        }
    }

    /// Run the due claim attempt against the active request.
    pub fn attempt(&mut self) -> Option<AttemptOutcome> {
        if self.state != DriverState::AwaitingAttempt {
            return None;
        }
        self.deadline = None;
        let request = Arc::clone(self.active.as_ref()?);
        if let Some(by) = request.claimant() {
            self.state = DriverState::Lost;
            return Some(AttemptOutcome::AlreadyClaimed {
                by: Some(by.to_string()),
            });
        }
        if request.try_claim(&self.name) {
            self.state = DriverState::Won;
            Some(AttemptOutcome::Accepted)
        } else {
            self.state = DriverState::Lost;
            let by = request.claimant().map(str::to_string);
            tracing::info!(driver = %self.name, by = ?by, "tried to accept but too late");
            Some(AttemptOutcome::TooLate { by })
        }
    }

    /// Called when the inbox disconnects; abandons a pending attempt.
    pub fn abandon(&mut self) -> Option<AttemptOutcome> {
        if self.state != DriverState::AwaitingAttempt {
            return None;
        }
        self.state = DriverState::Lost;
        self.deadline = None;
        Some(AttemptOutcome::Abandoned)
    }
}

/// Bus-facing half of a driver: forwards events into the worker's inbox.
pub struct SubscribedDriver {
    name: DriverName,
    inbox: Sender<RideEvent>,
}

impl Subscriber for SubscribedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &RideEvent) -> Result<(), DeliveryError> {
        self.inbox
            .send(event.clone())
            .map_err(|_| DeliveryError::Disconnected(self.name.clone()))
    }
}

/// A running event-driven driver.
pub struct DriverHandle {
    pub id: SubscriberId,
    pub name: DriverName,
    pub thread: thread::JoinHandle<DriverState>,
}

/// Subscribe a driver to `bus` and start its worker thread.
///
/// Outcomes are pushed to `reports` once the driver resolves.
pub fn spawn_driver(
    name: impl Into<DriverName>,
    delay: Duration,
    bus: &Arc<EventBus>,
    reports: Sender<DriverReport>,
) -> io::Result<DriverHandle> {
    let name = name.into();
    let (inbox, rx) = mpsc::channel();
    let machine = DriverMachine::new(name.clone(), delay);
    let worker_bus = Arc::clone(bus);
    let thread = thread::Builder::new()
        .name(format!("driver-{name}"))
        .spawn(move || run_driver(machine, rx, &worker_bus, &reports))?;
    let id = bus.subscribe(Arc::new(SubscribedDriver {
        name: name.clone(),
        inbox,
    }));
    Ok(DriverHandle { id, name, thread })
}

fn resolve(
    machine: &DriverMachine,
    outcome: AttemptOutcome,
    bus: &EventBus,
    reports: &Sender<DriverReport>,
) {
    if outcome.is_accepted() {
        if let Some(request) = machine.active_request() {
            tracing::info!(driver = machine.name(), "accepted the ride, notifying others");
            bus.publish(&RideEvent::Accepted {
                request: Arc::clone(request),
                driver: machine.name().to_string(),
            });
        }
    }
    // The coordinator may have stopped listening after its wait bound.
    let _ = reports.send(DriverReport::new(machine.name(), outcome));
}

fn run_driver(
    mut machine: DriverMachine,
    inbox: Receiver<RideEvent>,
    bus: &EventBus,
    reports: &Sender<DriverReport>,
) -> DriverState {
    loop {
        let next = match machine.deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    if let Some(outcome) = machine.attempt() {
                        resolve(&machine, outcome, bus, reports);
                    }
                    continue;
                }
                inbox.recv_timeout(deadline - now)
            }
            None => inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(event) => {
                if let Some(outcome) = machine.handle(&event, Instant::now()) {
                    resolve(&machine, outcome, bus, reports);
                }
                if machine.finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(outcome) = machine.abandon() {
                    resolve(&machine, outcome, bus, reports);
                }
                break;
            }
        }
    }
    tracing::debug!(
        driver = machine.name(),
        state = ?machine.state(),
        resolved = machine.state().is_terminal(),
        "driver exiting"
    );
    machine.state()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Arc<RideRequest> {
        Arc::new(RideRequest::new("Marina Bay", "Changi Airport"))
    }

    #[test]
    fn requested_arms_attempt_deadline() {
        let mut machine = DriverMachine::new("Alice", Duration::from_millis(100));
        let now = Instant::now();
        let req = request();
        assert_eq!(machine.handle(&RideEvent::Requested(Arc::clone(&req)), now), None);
        assert_eq!(machine.state(), DriverState::AwaitingAttempt);
        assert_eq!(machine.deadline(), Some(now + Duration::from_millis(100)));

        // A second request while busy is ignored.
        let other = request();
        machine.handle(&RideEvent::Requested(other), now);
        assert!(Arc::ptr_eq(machine.active_request().expect("active"), &req));
    }

    #[test]
    fn disconnect_abandons_pending_attempt() {
        let mut machine = DriverMachine::new("David", Duration::from_secs(10));
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        assert_eq!(machine.state(), DriverState::AwaitingAttempt);

        assert_eq!(machine.abandon(), Some(AttemptOutcome::Abandoned));
        assert_eq!(machine.state(), DriverState::Lost);
        assert_eq!(machine.deadline(), None);
        assert!(machine.state().is_terminal());
        // Already resolved: nothing further to report.
        assert_eq!(machine.abandon(), None);
        assert!(!req.is_claimed());
        assert_eq!(req.attempts(), 0);
    }

    #[test]
    fn idle_driver_has_nothing_to_abandon() {
        let mut machine = DriverMachine::new("Alice", Duration::ZERO);
        assert_eq!(machine.abandon(), None);
        assert_eq!(machine.state(), DriverState::Idle);
    }

    #[test]
    fn requested_after_claim_resolves_immediately() {
        let mut machine = DriverMachine::new("Charlie", Duration::from_secs(10));
        let req = request();
        // Accepted overtook Requested: ignored while Idle.
        assert!(req.try_claim("Bob"));
        let accepted = RideEvent::Accepted {
            request: Arc::clone(&req),
            driver: "Bob".to_string(),
        };
        assert_eq!(machine.handle(&accepted, Instant::now()), None);
        assert_eq!(machine.state(), DriverState::Idle);

        assert_eq!(
            machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now()),
            Some(AttemptOutcome::AlreadyClaimed {
                by: Some("Bob".to_string())
            })
        );
        assert_eq!(machine.state(), DriverState::Lost);
        assert_eq!(machine.deadline(), None);
        assert_eq!(req.attempts(), 1);
    }

    #[test]
    fn own_attempt_wins_open_request() {
        let mut machine = DriverMachine::new("Alice", Duration::ZERO);
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        assert_eq!(machine.attempt(), Some(AttemptOutcome::Accepted));
        assert_eq!(machine.state(), DriverState::Won);
        assert_eq!(req.claimant(), Some("Alice"));
        // A second attempt is a no-op.
        assert_eq!(machine.attempt(), None);
    }

    #[test]
    fn accepted_by_other_loses_without_claiming() {
        let mut machine = DriverMachine::new("Bob", Duration::from_secs(10));
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        assert!(req.try_claim("Alice"));
        let accepted = RideEvent::Accepted {
            request: Arc::clone(&req),
            driver: "Alice".to_string(),
        };
        assert_eq!(
            machine.handle(&accepted, Instant::now()),
            Some(AttemptOutcome::AlreadyClaimed {
                by: Some("Alice".to_string())
            })
        );
        assert_eq!(machine.state(), DriverState::Lost);
        assert_eq!(machine.deadline(), None);
        // Duplicate delivery is idempotent.
        assert_eq!(machine.handle(&accepted, Instant::now()), None);
        assert_eq!(req.attempts(), 1);
    }

    #[test]
    fn events_for_other_requests_are_ignored() {
        let mut machine = DriverMachine::new("Bob", Duration::from_secs(10));
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        let stranger = request();
        let accepted = RideEvent::Accepted {
            request: Arc::clone(&stranger),
            driver: "Alice".to_string(),
        };
        assert_eq!(machine.handle(&accepted, Instant::now()), None);
        let cancelled = RideEvent::Cancelled {
            request: stranger,
            reason: "elsewhere".to_string(),
        };
        assert_eq!(machine.handle(&cancelled, Instant::now()), None);
        assert_eq!(machine.state(), DriverState::AwaitingAttempt);
        assert!(!machine.finished());
    }

    #[test]
    fn lost_race_reports_too_late() {
        let mut machine = DriverMachine::new("Bob", Duration::ZERO);
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        assert!(req.try_claim("Alice"));
        assert_eq!(
            machine.attempt(),
            Some(AttemptOutcome::AlreadyClaimed {
                by: Some("Alice".to_string())
            })
        );
        assert_eq!(machine.state(), DriverState::Lost);
    }

    #[test]
    fn cancelled_after_win_keeps_state() {
        let mut machine = DriverMachine::new("Alice", Duration::ZERO);
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        machine.attempt();
        let cancelled = RideEvent::Cancelled {
            request: Arc::clone(&req),
            reason: "ride already taken".to_string(),
        };
        assert_eq!(machine.handle(&cancelled, Instant::now()), None);
        assert_eq!(machine.state(), DriverState::Won);
        assert!(machine.finished());
    }

    #[test]
    fn cancelled_while_waiting_abandons() {
        let mut machine = DriverMachine::new("Charlie", Duration::from_secs(10));
        let req = request();
        machine.handle(&RideEvent::Requested(Arc::clone(&req)), Instant::now());
        let cancelled = RideEvent::Cancelled {
            request: Arc::clone(&req),
            reason: "no driver accepted".to_string(),
        };
        assert_eq!(
            machine.handle(&cancelled, Instant::now()),
            Some(AttemptOutcome::Abandoned)
        );
        assert_eq!(machine.state(), DriverState::Lost);
        assert!(!req.is_claimed());
    }

    #[test]
    fn spawned_drivers_agree_on_single_winner() {
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = mpsc::channel();
        let names = ["Alice", "Bob", "Charlie", "David"];
        let handles: Vec<DriverHandle> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                spawn_driver(*name, Duration::from_millis(i as u64), &bus, tx.clone())
                    .expect("spawn driver")
            })
            .collect();
        drop(tx);

        let req = request();
        assert_eq!(bus.publish(&RideEvent::Requested(Arc::clone(&req))).delivered, 4);

        let mut reports = Vec::new();
        for _ in 0..names.len() {
            reports.push(rx.recv_timeout(Duration::from_secs(2)).expect("report"));
        }
        let winners: Vec<_> = reports.iter().filter(|r| r.outcome.is_accepted()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(req.claimant(), Some(winners[0].driver.as_str()));

        bus.publish(&RideEvent::Cancelled {
            request: Arc::clone(&req),
            reason: "ride already taken".to_string(),
        });
        let mut won = 0;
        for handle in handles {
            assert!(bus.unsubscribe(handle.id));
            let state = handle.thread.join().expect("driver thread panicked");
            assert!(state.is_terminal());
            if state == DriverState::Won {
                won += 1;
            }
        }
        assert_eq!(won, 1);
    }
}
