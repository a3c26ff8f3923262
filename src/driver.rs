//! Polling driver: waits out its response delay, then makes one claim attempt.

use std::time::Duration;

use crate::cancel::CancelSignal;
use crate::request::RideRequest;
use crate::types::{AttemptOutcome, DriverName, DriverReport};

/// A driver bound to a fixed response delay for one run.
#[derive(Clone, Debug)]
pub struct Driver {
    name: DriverName,
    delay: Duration,
}

impl Driver {
    /// Create a driver with a fixed response delay.
    pub fn new(name: impl Into<DriverName>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }

    /// Driver name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the single claim attempt against `request`.
    pub fn attempt(&self, request: &RideRequest, cancel: &CancelSignal) -> AttemptOutcome {
        if cancel.wait_timeout(self.delay) {
            tracing::debug!(driver = %self.name, request_id = request.id(), "wait interrupted, abandoning");
            return AttemptOutcome::Abandoned;
        }

        if let Some(by) = request.claimant() {
            tracing::info!(driver = %self.name, by = %by, "request already accepted");
            return AttemptOutcome::AlreadyClaimed {
                by: Some(by.to_string()),
            };
        }

        if request.try_claim(&self.name) {
            tracing::info!(
                driver = %self.name,
                request_id = request.id(),
                "ride confirmed, other drivers will be notified"
            );
            AttemptOutcome::Accepted
        } else {
            let by = request.claimant().map(str::to_string);
            tracing::info!(driver = %self.name, by = ?by, "tried to accept but too late");
            AttemptOutcome::TooLate { by }
        }
    }

    /// Run `attempt` and wrap the outcome with this driver's name.
    pub fn report(&self, request: &RideRequest, cancel: &CancelSignal) -> DriverReport {
        DriverReport::new(self.name.clone(), self.attempt(request, cancel))
    }
}
