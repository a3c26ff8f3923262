//! Polling dispatcher: hands one request to a fixed pool of driver workers.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelSignal;
use crate::driver::Driver;
use crate::request::RideRequest;
use crate::types::{AttemptOutcome, DriverReport};
use crate::work_queue::WorkQueue;

/// What the dispatcher observed before quiescence or its wait bound.
#[derive(Debug)]
pub struct DispatchResult {
    pub reports: Vec<DriverReport>,
    pub timed_out: bool,
}

pub struct Dispatcher {
    pool_size: Option<usize>,
}

impl Dispatcher {
    /// One worker per driver, like a thread pool sized to the roster.
    pub fn new() -> Self {
        Self { pool_size: None }
    }

    /// Cap the worker pool; drivers beyond the cap wait in the queue.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size: Some(pool_size.max(1)),
        }
    }

    /// Dispatch `drivers` against `request` and wait up to `wait_bound`.
    ///
    /// On timeout, pending delays are interrupted and queued drivers are
    /// reported as abandoned. Workers still inside an attempt are detached.
    pub fn run(
        &self,
        request: &Arc<RideRequest>,
        drivers: Vec<Driver>,
        wait_bound: Duration,
    ) -> DispatchResult {
        let expected = drivers.len();
        let workers = self.pool_size.unwrap_or(expected).min(expected).max(1);
        let queue = Arc::new(WorkQueue::new());
        let cancel = Arc::new(CancelSignal::new());
        let (tx, rx) = mpsc::channel();

        for driver in drivers {
            queue.push(driver).expect("work queue closed before dispatch");
        }
        queue.close();
        tracing::debug!(
            request_id = request.id(),
            queued = queue.len(),
            workers,
            "dispatching"
        );

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let cancel = Arc::clone(&cancel);
            let request = Arc::clone(request);
            let tx = tx.clone();
            // Detached; the handle is dropped so a timed-out run never joins.
            thread::Builder::new()
                .name(format!("dispatch-worker-{worker}"))
                .spawn(move || {
                    while let Some(driver) = queue.pop_or_closed() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let report = driver.report(&request, &cancel);
                        if tx.send(report).is_err() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn dispatch worker");
        }
        drop(tx);

        let deadline = Instant::now() + wait_bound;
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

        if timed_out {
            // Drain first so a worker woken by the cancel finds nothing to pop.
            let pending = queue.drain();
            cancel.cancel();
            tracing::info!(
                request_id = request.id(),
                reported = reports.len(),
                never_started = pending.len(),
                "wait bound elapsed, abandoning outstanding drivers"
            );
            for driver in pending {
                reports.push(DriverReport::new(driver.name(), AttemptOutcome::Abandoned));
            }
        }

        DispatchResult { reports, timed_out }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(delays_ms: &[u64]) -> Vec<Driver> {
        delays_ms
            .iter()
            .enumerate()
            .map(|(i, ms)| Driver::new(format!("driver-{i}"), Duration::from_millis(*ms)))
            .collect()
    }

    #[test]
    fn every_driver_reports_and_one_wins() {
        let request = Arc::new(RideRequest::new("Marina Bay", "Changi Airport"));
        let result = Dispatcher::new().run(&request, roster(&[3, 1, 2, 0]), Duration::from_secs(2));
        assert!(!result.timed_out);
        assert_eq!(result.reports.len(), 4);
        let winners: Vec<_> = result
            .reports
            .iter()
            .filter(|r| r.outcome.is_accepted())
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(request.claimant(), Some(winners[0].driver.as_str()));
    }

    #[test]
    fn small_pool_still_serves_every_driver() {
        let request = Arc::new(RideRequest::new("Marina Bay", "Changi Airport"));
        let result = Dispatcher::with_pool_size(1).run(
            &request,
            roster(&[0, 0, 0, 0, 0]),
            Duration::from_secs(2),
        );
        assert_eq!(result.reports.len(), 5);
        // Serial execution: the first driver wins, the rest see it claimed.
        assert_eq!(request.claimant(), Some("driver-0"));
        let short_circuited = result
            .reports
            .iter()
            .filter(|r| matches!(r.outcome, AttemptOutcome::AlreadyClaimed { .. }))
            .count();
        assert_eq!(short_circuited, 4);
    }

    #[test]
    fn timeout_abandons_slow_drivers() {
        let request = Arc::new(RideRequest::new("Marina Bay", "Changi Airport"));
        let start = Instant::now();
        let result = Dispatcher::with_pool_size(2).run(
            &request,
            roster(&[10_000, 10_000, 10_000]),
            Duration::from_millis(30),
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(result.timed_out);
        // In-flight drivers are detached; the queued one is always abandoned.
        assert!(result.reports.iter().any(|r| r.driver == "driver-2"));
        assert!(
            result
                .reports
                .iter()
                .all(|r| r.outcome == AttemptOutcome::Abandoned)
        );
        assert!(!request.is_claimed());
    }

    #[test]
    fn queued_drivers_are_always_reported_on_timeout() {
        for run in 0..500 {
            let request = Arc::new(RideRequest::new("Marina Bay", "Changi Airport"));
            let result = Dispatcher::with_pool_size(1).run(
                &request,
                roster(&[10_000, 10_000]),
                Duration::from_millis(1),
            );
            assert!(result.timed_out, "run {run}");
            // driver-0 may or may not have started; driver-1 never can.
            assert!(
                result
                    .reports
                    .iter()
                    .any(|r| r.driver == "driver-1" && r.outcome == AttemptOutcome::Abandoned),
                "run {run}: queued driver missing from {:?}",
                result.reports
            );
            assert!(!request.is_claimed());
        }
    }
}
