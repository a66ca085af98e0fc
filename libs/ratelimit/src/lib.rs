//! Distributed token-bucket rate limiter.
//!
//! Bounds the aggregate call rate against a scarce upstream API across all
//! processes sharing one store. Capacity `C`, continuous refill at `r`
//! tokens/second; refill and consume execute as a single atomic operation
//! against the store (a server-side script for Redis), so two concurrent
//! callers can never both observe "enough tokens" and both deduct.
//!
//! When the store is unreachable the limiter degrades per an explicit,
//! configured policy, either deny (bounded retry until the deadline) or a
//! process-local throttle. It never silently grants.

pub mod bucket;
pub mod redis_store;
pub mod store;

pub use bucket::{AcquireOutcome, BucketStats, DegradedPolicy, TokenBucket, TokenBucketConfig};
pub use redis_store::RedisBucketStore;
pub use store::{BucketStore, ConsumeDecision, MemoryBucketStore};

use thiserror::Error;

/// Result type for rate limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors from the rate limiter and its backing stores
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("store error: {0}")]
    Store(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("configuration error: {0}")]
    Configuration(String),
}
