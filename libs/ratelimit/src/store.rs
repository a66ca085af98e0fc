//! Token-bucket store abstraction and the in-process store.

use crate::{RateLimitError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

/// Outcome of one atomic refill-and-consume round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeDecision {
    pub granted: bool,
    /// Tokens remaining after the operation (post-refill, post-deduct).
    pub tokens: f64,
}

/// A store holding token-bucket state keyed by limiter identifier.
///
/// Implementations MUST perform the refill computation and the conditional
/// deduction as one indivisible operation; doing them as separate round
/// trips reintroduces the read-modify-write race this component exists to
/// prevent. A `cost` of zero refills and reports without consuming, which
/// is how diagnostics read the bucket.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn refill_and_consume(
        &self,
        key: &str,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
    ) -> Result<ConsumeDecision>;
}

/// Tolerance for float comparison when deciding whether `cost` fits.
const TOKEN_EPSILON: f64 = 1e-9;

/// Shared refill-and-consume arithmetic: returns (granted, tokens_after).
pub(crate) fn apply_refill_and_consume(
    tokens: f64,
    elapsed_secs: f64,
    capacity: f64,
    refill_per_sec: f64,
    cost: f64,
) -> (bool, f64) {
    let refilled = (tokens + elapsed_secs.max(0.0) * refill_per_sec).min(capacity);
    if refilled + TOKEN_EPSILON >= cost {
        (true, (refilled - cost).max(0.0))
    } else {
        (false, refilled)
    }
}

struct Slot {
    tokens: f64,
    stamp: Instant,
}

/// In-process store for single-instance deployments and tests.
///
/// Same contract as the distributed store: one mutex section covers refill
/// and deduct, so concurrent callers serialize through the identical
/// decision the Redis script makes server-side.
#[derive(Default)]
pub struct MemoryBucketStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn refill_and_consume(
        &self,
        key: &str,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
    ) -> Result<ConsumeDecision> {
        if capacity <= 0.0 {
            return Err(RateLimitError::Configuration(format!(
                "capacity must be positive, got {capacity}"
            )));
        }
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_insert(Slot {
            tokens: capacity,
            stamp: now,
        });
        let elapsed = now.saturating_duration_since(slot.stamp).as_secs_f64();
        let (granted, tokens) =
            apply_refill_and_consume(slot.tokens, elapsed, capacity, refill_per_sec, cost);
        slot.tokens = tokens;
        slot.stamp = now;
        Ok(ConsumeDecision { granted, tokens })
    }
}
