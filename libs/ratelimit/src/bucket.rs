//! The token bucket and its acquire/degraded-mode logic.

use crate::store::BucketStore;
use crate::Result;
use governor::{DefaultDirectRateLimiter, Quota};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Floor for the computed retry sleep so a nearly-full bucket does not spin.
const RETRY_FLOOR: Duration = Duration::from_millis(10);

/// Backoff between store attempts while degraded with the deny policy.
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Behavior when the shared store is unreachable. Silently granting is not
/// an option: the limiter either throttles hard or falls back to a local
/// approximation, and the choice is explicit configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    /// Keep retrying the store with backoff until the acquire deadline,
    /// then report timeout. Safe: throttles to zero while degraded.
    #[default]
    Deny,
    /// Fall back to a process-local limiter approximating the configured
    /// rate. Available but imprecise across processes.
    LocalThrottle,
}

/// Outcome of an acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    TimedOut,
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted)
    }
}

/// Read-only bucket diagnostics, computed with refill-on-read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub current_tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub utilization_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Rate-limit identifier in the shared store, e.g. "provider:upstream".
    pub key: String,
    /// Maximum tokens the bucket holds.
    pub capacity: f64,
    /// Continuous refill rate in tokens/second.
    pub refill_per_sec: f64,
    pub degraded_policy: DegradedPolicy,
}

/// Distributed token bucket over a shared atomic store.
pub struct TokenBucket {
    config: TokenBucketConfig,
    store: Arc<dyn BucketStore>,
    /// Present only under the local-throttle degraded policy.
    fallback: Option<DefaultDirectRateLimiter>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig, store: Arc<dyn BucketStore>) -> Self {
        let fallback = match config.degraded_policy {
            DegradedPolicy::Deny => None,
            DegradedPolicy::LocalThrottle => {
                Some(local_limiter(config.capacity, config.refill_per_sec))
            }
        };
        Self {
            config,
            store,
            fallback,
        }
    }

    /// Acquire `cost` tokens, waiting and retrying up to `timeout`.
    ///
    /// Store failures are absorbed per the configured degraded policy; the
    /// caller only ever sees granted or timed out, never an indefinite
    /// block.
    pub async fn acquire(&self, cost: f64, timeout: Duration) -> AcquireOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .store
                .refill_and_consume(
                    &self.config.key,
                    self.config.capacity,
                    self.config.refill_per_sec,
                    cost,
                )
                .await
            {
                Ok(decision) if decision.granted => {
                    debug!(
                        key = %self.config.key,
                        remaining = decision.tokens,
                        "tokens acquired"
                    );
                    return AcquireOutcome::Granted;
                }
                Ok(decision) => {
                    let wait = if self.config.refill_per_sec > 0.0 {
                        let deficit = (cost - decision.tokens).max(0.0);
                        Duration::from_secs_f64(deficit / self.config.refill_per_sec)
                            .max(RETRY_FLOOR)
                    } else {
                        // Nothing will ever refill; run out the clock.
                        deadline.saturating_duration_since(Instant::now())
                    };
                    if !sleep_within(deadline, wait).await {
                        return AcquireOutcome::TimedOut;
                    }
                }
                Err(e) => {
                    warn!(key = %self.config.key, error = %e, "token bucket store unreachable");
                    match self.config.degraded_policy {
                        DegradedPolicy::Deny => {
                            if !sleep_within(deadline, STORE_RETRY_BACKOFF).await {
                                return AcquireOutcome::TimedOut;
                            }
                        }
                        DegradedPolicy::LocalThrottle => {
                            return self.acquire_local(cost, deadline).await;
                        }
                    }
                }
            }
        }
    }

    /// Current bucket state without consuming: zero-cost pass through the
    /// same atomic operation.
    pub async fn get_stats(&self) -> Result<BucketStats> {
        let decision = self
            .store
            .refill_and_consume(
                &self.config.key,
                self.config.capacity,
                self.config.refill_per_sec,
                0.0,
            )
            .await?;
        let utilization = if self.config.capacity > 0.0 {
            (1.0 - decision.tokens / self.config.capacity) * 100.0
        } else {
            0.0
        };
        Ok(BucketStats {
            current_tokens: decision.tokens,
            capacity: self.config.capacity,
            refill_rate: self.config.refill_per_sec,
            utilization_percent: utilization,
        })
    }

    async fn acquire_local(&self, cost: f64, deadline: Instant) -> AcquireOutcome {
        let Some(limiter) = &self.fallback else {
            // Only reachable under LocalThrottle, which always builds one.
            return AcquireOutcome::TimedOut;
        };
        let n = NonZeroU32::new(cost.ceil().max(1.0) as u32).unwrap_or(nonzero!(1u32));
        match tokio::time::timeout_at(deadline, limiter.until_n_ready(n)).await {
            Ok(Ok(())) => {
                debug!(key = %self.config.key, "granted by local fallback limiter");
                AcquireOutcome::Granted
            }
            Ok(Err(_)) => {
                warn!(
                    key = %self.config.key,
                    cost,
                    "cost exceeds local fallback burst capacity"
                );
                AcquireOutcome::TimedOut
            }
            Err(_) => AcquireOutcome::TimedOut,
        }
    }
}

fn local_limiter(capacity: f64, refill_per_sec: f64) -> DefaultDirectRateLimiter {
    let rate = NonZeroU32::new(refill_per_sec.ceil() as u32).unwrap_or(nonzero!(1u32));
    let burst = NonZeroU32::new(capacity.ceil() as u32).unwrap_or(nonzero!(1u32));
    DefaultDirectRateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
}

/// Sleep for `wait`, clamped to the deadline. Returns false once the
/// deadline has been reached.
async fn sleep_within(deadline: Instant, wait: Duration) -> bool {
    let now = Instant::now();
    if now >= deadline {
        return false;
    }
    let wait = wait.min(deadline.saturating_duration_since(now));
    tokio::time::sleep(wait).await;
    Instant::now() < deadline
}
