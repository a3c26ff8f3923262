//! The claimable ride request: single source of truth for who won.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::types::{DriverName, Outcome, RequestId};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct ClaimRecord {
    driver: DriverName,
    at: Instant,
}

/// A ride request that at most one driver can claim.
///
/// The claim lives in a set-once cell: the first successful `set` commits the
/// claimant and every later attempt observes it. There is no object-wide lock,
/// so readers never contend with claimers.
pub struct RideRequest {
    id: RequestId,
    origin: String,
    destination: String,
    claim: OnceLock<ClaimRecord>,
    attempts: AtomicUsize,
}

impl RideRequest {
    /// Create an open request between two opaque locations.
    pub fn new(origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            origin: origin.into(),
            destination: destination.into(),
            claim: OnceLock::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Process-unique request id.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Pickup location.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Drop-off location.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Attempt to claim the request for `driver`.
    ///
    /// Returns true for exactly one caller over the request's lifetime. A
    /// false result has no effect on the claim state.
    pub fn try_claim(&self, driver: &str) -> bool {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.is_claimed() {
            return false;
        }
        let record = ClaimRecord {
            driver: driver.to_string(),
            at: Instant::now(),
        };
        let won = self.claim.set(record).is_ok();
        if won {
            tracing::info!(
                request_id = self.id,
                driver = %driver,
                origin = %self.origin,
                destination = %self.destination,
                "ride accepted"
            );
        }
        won
    }

    /// Whether some driver has committed a claim.
    pub fn is_claimed(&self) -> bool {
        self.claim.get().is_some()
    }

    /// Claimant name; present iff the request is claimed.
    pub fn claimant(&self) -> Option<&str> {
        self.claim.get().map(|record| record.driver.as_str())
    }

    /// When the winning claim was committed.
    pub fn claimed_at(&self) -> Option<Instant> {
        self.claim.get().map(|record| record.at)
    }

    /// Total `try_claim` calls, including losing ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Snapshot of the committed claim state.
    pub fn outcome(&self) -> Outcome {
        match self.claimant() {
            Some(driver) => Outcome::ClaimedBy(driver.to_string()),
            None => Outcome::Unclaimed,
        }
    }
}

impl std::fmt::Debug for RideRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RideRequest")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("destination", &self.destination)
            .field("claimant", &self.claimant())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn fresh_request_is_open() {
        let request = RideRequest::new("Marina Bay", "Changi Airport");
        assert!(!request.is_claimed());
        assert_eq!(request.claimant(), None);
        assert_eq!(request.claimed_at(), None);
        assert_eq!(request.outcome(), Outcome::Unclaimed);
        assert_eq!(request.origin(), "Marina Bay");
        assert_eq!(request.destination(), "Changi Airport");
    }

    #[test]
    fn request_ids_are_unique() {
        let a = RideRequest::new("a", "b");
        let b = RideRequest::new("a", "b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn later_claims_never_change_claimant() {
        let request = RideRequest::new("Marina Bay", "Changi Airport");
        assert!(request.try_claim("Alice"));
        assert!(request.is_claimed());
        let committed_at = request.claimed_at().expect("claim time missing");
        for late in ["Bob", "Charlie", "David", "Alice"] {
            assert!(!request.try_claim(late));
        }
        assert_eq!(request.claimant(), Some("Alice"));
        assert_eq!(request.claimed_at(), Some(committed_at));
        assert_eq!(request.attempts(), 5);
        assert_eq!(request.outcome(), Outcome::ClaimedBy("Alice".to_string()));
    }

    #[test]
    fn exactly_one_winner_under_contention() {
        let contenders = 50;
        let trials = 1_000;
        for trial in 0..trials {
            let request = Arc::new(RideRequest::new("origin", "destination"));
            let barrier = Arc::new(Barrier::new(contenders));
            let wins = Arc::new(AtomicUsize::new(0));
            thread::scope(|scope| {
                for driver in 0..contenders {
                    let request = Arc::clone(&request);
                    let barrier = Arc::clone(&barrier);
                    let wins = Arc::clone(&wins);
                    scope.spawn(move || {
                        let name = format!("driver-{driver}");
                        barrier.wait();
                        if request.try_claim(&name) {
                            wins.fetch_add(1, Ordering::SeqCst);
                            // The winner must see its own name committed.
                            assert_eq!(request.claimant(), Some(name.as_str()));
                        }
                    });
                }
            });
            assert_eq!(wins.load(Ordering::SeqCst), 1, "trial {trial}");
            assert_eq!(request.attempts(), contenders);
        }
    }

    #[test]
    fn pre_claimed_request_admits_no_winner() {
        let request = Arc::new(RideRequest::new("origin", "destination"));
        assert!(request.try_claim("X"));
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let mut handles = Vec::new();
        for driver in 0..contenders {
            let request = Arc::clone(&request);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                request.try_claim(&format!("driver-{driver}"))
            }));
        }
        for handle in handles {
            assert!(!handle.join().expect("claim thread panicked"));
        }
        assert_eq!(request.claimant(), Some("X"));
    }
}
