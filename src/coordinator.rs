//! Coordinator: builds one request, runs the drivers, reports the outcome.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dispatcher::Dispatcher;
use crate::driver::Driver;
use crate::error::ConfigError;
use crate::event_bus::{EventBus, RideEvent};
use crate::request::RideRequest;
use crate::subscriber::spawn_driver;
use crate::types::{AttemptOutcome, DriverName, DriverReport, Outcome, RequestId};

pub const DEFAULT_ORIGIN: &str = "Marina Bay";
pub const DEFAULT_DESTINATION: &str = "Changi Airport";
pub const DEFAULT_DRIVERS: [&str; 4] = ["Alice", "Bob", "Charlie", "David"];
// Polling run: drivers answer within 3s, the coordinator waits 5s.
pub const POLLING_MAX_DELAY_MS: u64 = 3_000;
pub const POLLING_WAIT_BOUND_MS: u64 = 5_000;
// Event-driven run: drivers answer within 2s, the coordinator waits 4s.
pub const EVENT_MAX_DELAY_MS: u64 = 2_000;
pub const EVENT_WAIT_BOUND_MS: u64 = 4_000;

pub const REASON_TAKEN: &str = "ride already taken";
pub const REASON_NO_DRIVER: &str = "no driver accepted";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Polling,
    EventDriven,
}

impl Variant {
    /// Name used in CLI flags and summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Polling => "polling",
            Variant::EventDriven => "event",
        }
    }
}

/// All knobs for one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub origin: String,
    pub destination: String,
    pub drivers: Vec<DriverName>,
    /// Upper bound (exclusive) for each driver's random response delay.
    pub max_delay: Duration,
    /// How long the coordinator waits before reporting.
    pub wait_bound: Duration,
    /// Seed for the delay plan; the same seed yields the same delays.
    pub seed: u64,
    /// Explicit per-driver delays, overriding the seeded plan.
    pub delays: Option<Vec<Duration>>,
    /// Claim the request for this name before any driver starts.
    pub pre_claim: Option<DriverName>,
    /// Polling worker pool size; defaults to one worker per driver.
    pub pool_size: Option<usize>,
}

impl SimulationConfig {
    /// Documented defaults for `variant`.
    pub fn for_variant(variant: Variant) -> Self {
        let (max_delay_ms, wait_bound_ms) = match variant {
            Variant::Polling => (POLLING_MAX_DELAY_MS, POLLING_WAIT_BOUND_MS),
            Variant::EventDriven => (EVENT_MAX_DELAY_MS, EVENT_WAIT_BOUND_MS),
        };
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            drivers: DEFAULT_DRIVERS.iter().map(|name| name.to_string()).collect(),
            max_delay: Duration::from_millis(max_delay_ms),
            wait_bound: Duration::from_millis(wait_bound_ms),
            seed: 0,
            delays: None,
            pre_claim: None,
            pool_size: None,
        }
    }

    /// Reject parameters no run could satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drivers.is_empty() {
            return Err(ConfigError::NoDrivers);
        }
        let mut seen = HashSet::new();
        for name in &self.drivers {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyDriverName);
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateDriver(name.clone()));
            }
        }
        if self.wait_bound.is_zero() {
            return Err(ConfigError::ZeroWaitBound);
        }
        if self.pool_size == Some(0) {
            return Err(ConfigError::ZeroPoolSize);
        }
        if let Some(delays) = &self.delays {
            if delays.len() != self.drivers.len() {
                return Err(ConfigError::DelayPlanMismatch {
                    drivers: self.drivers.len(),
                    delays: delays.len(),
                });
            }
        }
        Ok(())
    }

    /// Per-driver response delays, in roster order.
    pub fn delay_plan(&self) -> Vec<Duration> {
        if let Some(delays) = &self.delays {
            return delays.clone();
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let max_us = u64::try_from(self.max_delay.as_micros()).unwrap_or(u64::MAX);
        self.drivers
            .iter()
            .map(|_| {
                if max_us == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_micros(rng.gen_range(0..max_us))
                }
            })
            .collect()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::for_variant(Variant::Polling)
    }
}

/// Final snapshot of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub variant: Variant,
    pub request_id: RequestId,
    pub origin: String,
    pub destination: String,
    pub outcome: Outcome,
    pub reports: Vec<DriverReport>,
    /// Drivers whose outcome was not observed before the wait bound.
    pub unreported: Vec<DriverName>,
    pub timed_out: bool,
    /// Total `try_claim` calls seen by the request at snapshot time.
    pub attempts: usize,
    pub elapsed: Duration,
    /// Time from start to the committed claim, if it happened during the run.
    pub time_to_claim: Option<Duration>,
}

impl SimulationReport {
    /// Number of drivers that reported `Accepted`.
    pub fn winners_reported(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.is_accepted())
            .count()
    }

    /// Reports agree with the request's committed claimant.
    pub fn consistent(&self) -> bool {
        let winners: Vec<&str> = self
            .reports
            .iter()
            .filter(|report| report.outcome.is_accepted())
            .map(|report| report.driver.as_str())
            .collect();
        if winners.len() > 1 {
            return false;
        }
        let committed = self.outcome.winner();
        if let Some(winner) = winners.first() {
            if committed != Some(*winner) {
                return false;
            }
        }
        self.reports.iter().all(|report| match &report.outcome {
            AttemptOutcome::TooLate { by: Some(by) }
            | AttemptOutcome::AlreadyClaimed { by: Some(by) } => committed == Some(by.as_str()),
            _ => true,
        })
    }
}

/// Creates ride requests on behalf of a rider.
pub struct Client;

impl Client {
    /// Open a fresh request between two locations.
    pub fn request_ride(origin: &str, destination: &str) -> Arc<RideRequest> {
        let request = Arc::new(RideRequest::new(origin, destination));
        tracing::info!(
            request_id = request.id(),
            origin = %origin,
            destination = %destination,
            "client requested a ride"
        );
        request
    }
}

pub struct Coordinator {
    config: SimulationConfig,
}

impl Coordinator {
    /// Validate `config` and build a coordinator.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run one simulation of `variant`.
    pub fn run(&self, variant: Variant) -> SimulationReport {
        match variant {
            Variant::Polling => self.run_polling(),
            Variant::EventDriven => self.run_event_driven(),
        }
    }

    fn new_request(&self) -> Arc<RideRequest> {
        let request = Client::request_ride(&self.config.origin, &self.config.destination);
        if let Some(name) = &self.config.pre_claim {
            let claimed = request.try_claim(name);
            debug_assert!(claimed, "fresh request must accept a pre-claim");
            tracing::info!(request_id = request.id(), by = %name, "request pre-claimed");
        }
        request
    }

    /// Hand the request directly to a pool of polling drivers.
    pub fn run_polling(&self) -> SimulationReport {
        let request = self.new_request();
        let drivers: Vec<Driver> = self
            .config
            .drivers
            .iter()
            .zip(self.config.delay_plan())
            .map(|(name, delay)| Driver::new(name.clone(), delay))
            .collect();
        let dispatcher = match self.config.pool_size {
            Some(size) => Dispatcher::with_pool_size(size),
            None => Dispatcher::new(),
        };

        let start = Instant::now();
        let result = dispatcher.run(&request, drivers, self.config.wait_bound);
        self.finish(Variant::Polling, &request, result.reports, result.timed_out, start)
    }

    /// Broadcast the request over an event bus and let drivers race.
    pub fn run_event_driven(&self) -> SimulationReport {
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = mpsc::channel();
        let handles: Vec<_> = self
            .config
            .drivers
            .iter()
            .zip(self.config.delay_plan())
            .map(|(name, delay)| {
                spawn_driver(name.clone(), delay, &bus, tx.clone())
                    .expect("failed to spawn driver thread")
            })
            .collect();
        drop(tx);

        let request = self.new_request();
        let start = Instant::now();
        let delivery = bus.publish(&RideEvent::Requested(Arc::clone(&request)));
        tracing::debug!(
            request_id = request.id(),
            subscribers = bus.subscriber_count(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "ride request broadcast"
        );

        let expected = handles.len();
        let deadline = start + self.config.wait_bound;
        let mut reports = Vec::with_capacity(expected);
        let mut timed_out = false;
        while reports.len() < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(report) => reports.push(report),
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let report = self.finish(Variant::EventDriven, &request, reports, timed_out, start);

        // Best-effort cleanup notice; a win is never undone.
        let reason = match report.outcome {
            Outcome::ClaimedBy(_) => REASON_TAKEN,
            Outcome::Unclaimed => REASON_NO_DRIVER,
        };
        bus.publish(&RideEvent::Cancelled {
            request: Arc::clone(&request),
            reason: reason.to_string(),
        });
        // Unsubscribing drops each inbox sender. Finished workers are reaped;
        // the rest stay detached.
        for handle in handles {
            if !bus.unsubscribe(handle.id) {
                tracing::warn!(driver = %handle.name, "driver was not subscribed at cleanup");
            }
            if handle.thread.is_finished() {
                match handle.thread.join() {
                    Ok(state) => tracing::debug!(driver = %handle.name, state = ?state, "driver reaped"),
                    Err(_) => tracing::warn!(driver = %handle.name, "driver thread panicked"),
                }
            }
        }
        report
    }

    fn finish(
        &self,
        variant: Variant,
        request: &RideRequest,
        reports: Vec<DriverReport>,
        timed_out: bool,
        start: Instant,
    ) -> SimulationReport {
        let elapsed = start.elapsed();
        let outcome = request.outcome();
        let reported: HashSet<&str> = reports.iter().map(|r| r.driver.as_str()).collect();
        let unreported = self
            .config
            .drivers
            .iter()
            .filter(|name| !reported.contains(name.as_str()))
            .cloned()
            .collect();
        let time_to_claim = request
            .claimed_at()
            .and_then(|at| at.checked_duration_since(start));

        match outcome.winner() {
            Some(winner) => tracing::info!(request_id = request.id(), winner = %winner, "ride assigned"),
            None => tracing::warn!(request_id = request.id(), "no driver accepted the ride in time"),
        }

        SimulationReport {
            variant,
            request_id: request.id(),
            origin: request.origin().to_string(),
            destination: request.destination().to_string(),
            outcome,
            reports,
            unreported,
            timed_out,
            attempts: request.attempts(),
            elapsed,
            time_to_claim,
        }
    }
}
