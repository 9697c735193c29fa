//! Admission control
//!
//! Two gates in front of the isolate pool: a semaphore bounding how many
//! executions run at once, then a token bucket bounding how many start per
//! second. The rate limiter is only consulted while holding a semaphore slot,
//! so at most `concurrency` callers ever wait on it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission is closed, service is shutting down")]
    ShuttingDown,
}

/// Token bucket limiting how many executions start per second
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens added per second
    rate: f64,

    /// Bucket size
    burst: f64,

    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// Create a limiter admitting `rate` starts per second, bursting up to `burst`
    ///
    /// The bucket starts full. `burst` is raised to at least one token.
    /// Returns `None` unless `rate` is finite and positive: such a bucket
    /// would either never refill or never limit.
    pub fn new(rate: f64, burst: u32) -> Option<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return None;
        }
        let burst = f64::from(burst.max(1));
        Some(Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        })
    }

    /// Take a token, waiting for the bucket to refill if it is empty
    ///
    /// Cancelling the wait does not consume a token.
    pub async fn acquire(&self) {
        while let Some(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available, otherwise report how long until one is
    pub fn try_acquire(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    /// Tokens per second
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// The combined concurrency and rate gate
#[derive(Debug)]
pub struct Admission {
    concurrency: usize,
    slots: Arc<Semaphore>,
    limiter: Option<RateLimiter>,
}

/// A held execution slot
///
/// The slot is released exactly once, when the permit is dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
}

impl Admission {
    /// Create an admission controller
    ///
    /// A `rate` of zero (or below) disables rate limiting.
    pub fn new(concurrency: usize, rate: f64, burst: u32) -> Self {
        let limiter = RateLimiter::new(rate, burst);
        Self {
            concurrency,
            slots: Arc::new(Semaphore::new(concurrency)),
            limiter,
        }
    }

    /// Wait for a concurrency slot, then for the rate limiter
    ///
    /// Cancellation-safe: a cancelled wait holds no slot.
    #[instrument(skip(self))]
    pub async fn admit(&self) -> Result<AdmissionPermit, AdmissionError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::ShuttingDown)?;

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        debug!(in_flight = self.in_flight(), "admitted");
        Ok(AdmissionPermit { _slot: slot })
    }

    /// Refuse pending and future admissions
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Maximum number of concurrent executions
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of slots currently held
    pub fn in_flight(&self) -> usize {
        self.concurrency
            .saturating_sub(self.slots.available_permits())
    }
}
