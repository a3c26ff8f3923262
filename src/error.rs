//! Error types for configuration and event delivery.

use thiserror::Error;

/// Invalid simulation parameters, rejected before any driver starts.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one driver is required")]
    NoDrivers,
    #[error("driver names must not be empty")]
    EmptyDriverName,
    #[error("duplicate driver name: {0}")]
    DuplicateDriver(String),
    #[error("wait bound must be > 0")]
    ZeroWaitBound,
    #[error("worker pool size must be > 0")]
    ZeroPoolSize,
    #[error("{delays} delays given for {drivers} drivers")]
    DelayPlanMismatch { drivers: usize, delays: usize },
    #[error("contenders must be > 0")]
    ZeroContenders,
    #[error("trials must be > 0")]
    ZeroTrials,
}

/// Failure of a single subscriber to accept a broadcast event.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber's worker has exited and dropped its inbox.
    #[error("subscriber {0} is disconnected")]
    Disconnected(String),
}
