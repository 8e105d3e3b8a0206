//! Outbound request gate.
//!
//! Caps concurrent requests with a semaphore and paces them with a
//! governor quota, independent of how many workers share the gate.

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Concurrency cap plus rate limit, shared by every request of a fetcher.
#[derive(Clone)]
pub struct RateGate {
    semaphore: Arc<Semaphore>,
    limiter: Arc<DefaultRateLimiter>,
}

impl RateGate {
    /// Allow `max_concurrent` requests in flight and `requests_per_second`
    /// new requests per second. Zero values are raised to one.
    pub fn new(requests_per_second: u32, max_concurrent: usize) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(Quota::per_second(rate), max_concurrent)
    }

    /// Create with a custom quota.
    pub fn with_quota(quota: Quota, max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Wait for a concurrency slot, then for the rate limiter.
    ///
    /// The slot is held until the returned permit is dropped.
    pub async fn acquire(&self) -> GatePermit {
        // The semaphore is never closed
        let permit = self.semaphore.clone().acquire_owned().await.ok();
        self.limiter.until_ready().await;
        GatePermit { _permit: permit }
    }

    /// Concurrency slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Held for the duration of one outbound request.
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}
