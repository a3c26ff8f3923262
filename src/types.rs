//! Shared identifiers and outcome values used across the system.

use std::fmt;

/// Process-unique identifier for a ride request.
pub type RequestId = u64;
/// Human-readable driver identity; also the claimant recorded on a request.
pub type DriverName = String;

/// Final claim state of a request as seen by an observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No driver committed a claim.
    Unclaimed,
    /// The named driver won the request.
    ClaimedBy(DriverName),
}

impl Outcome {
    /// Claimant, if any.
    pub fn winner(&self) -> Option<&str> {
        match self {
            Outcome::Unclaimed => None,
            Outcome::ClaimedBy(name) => Some(name),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Unclaimed => write!(f, "unclaimed"),
            Outcome::ClaimedBy(name) => write!(f, "claimed_by:{name}"),
        }
    }
}

/// Result of a single driver's claim attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// This driver's `try_claim` committed.
    Accepted,
    /// `try_claim` was called but another driver had already committed.
    TooLate { by: Option<DriverName> },
    /// The request was observed claimed before attempting; no claim was made.
    AlreadyClaimed { by: Option<DriverName> },
    /// The wait was interrupted or the run was cancelled before attempting.
    Abandoned,
}

impl AttemptOutcome {
    /// Whether this attempt won the request.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptOutcome::Accepted)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Accepted => write!(f, "accepted"),
            AttemptOutcome::TooLate { by } => {
                write!(f, "too_late(by={})", by.as_deref().unwrap_or("?"))
            }
            AttemptOutcome::AlreadyClaimed { by } => {
                write!(f, "already_claimed(by={})", by.as_deref().unwrap_or("?"))
            }
            AttemptOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Outcome of one driver, pushed to the coordinator over a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverReport {
    pub driver: DriverName,
    pub outcome: AttemptOutcome,
}

impl DriverReport {
    /// Pair a driver with its attempt outcome.
    pub fn new(driver: impl Into<DriverName>, outcome: AttemptOutcome) -> Self {
        Self {
            driver: driver.into(),
            outcome,
        }
    }
}
