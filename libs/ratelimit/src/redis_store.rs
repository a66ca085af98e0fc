//! Redis-backed token-bucket store.
//!
//! The whole refill-then-consume sequence runs server-side as one Lua
//! script, so every process sharing the store sees a single atomic
//! decision. The script reads the clock from Redis `TIME`, so callers in
//! different processes never mix their own clocks into the refill math.

use crate::store::{BucketStore, ConsumeDecision};
use crate::Result;
use async_trait::async_trait;
use redis::Script;

/// KEYS[1] = bucket key, ARGV = capacity, refill rate, cost.
/// Returns {granted, tostring(tokens_after)}; the float goes back as a
/// string because Lua replies truncate numbers to integers.
const REFILL_AND_CONSUME: &str = r#"
local capacity = tonumber(ARGV[1])
local refill = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])

local t = redis.call('TIME')
local now = tonumber(t[1]) + tonumber(t[2]) / 1000000

local state = redis.call('HMGET', KEYS[1], 'tokens', 'stamp')
local tokens = tonumber(state[1])
local stamp = tonumber(state[2])
if tokens == nil or stamp == nil then
    tokens = capacity
    stamp = now
end

local elapsed = now - stamp
if elapsed < 0 then
    elapsed = 0
end
tokens = tokens + elapsed * refill
if tokens > capacity then
    tokens = capacity
end

local granted = 0
if tokens >= cost then
    tokens = tokens - cost
    granted = 1
end

redis.call('HSET', KEYS[1], 'tokens', tokens, 'stamp', now)
if refill > 0 then
    redis.call('EXPIRE', KEYS[1], math.ceil(capacity / refill) + 60)
end

return {granted, tostring(tokens)}
"#;

/// Store backed by a shared Redis instance.
pub struct RedisBucketStore {
    client: redis::Client,
    script: Script,
}

impl RedisBucketStore {
    /// Parse the connection target. Does not connect; connections are
    /// established per operation from the multiplexed pool.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            script: Script::new(REFILL_AND_CONSUME),
        })
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn refill_and_consume(
        &self,
        key: &str,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
    ) -> Result<ConsumeDecision> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (granted, tokens): (i64, String) = self
            .script
            .key(key)
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(cost)
            .invoke_async(&mut conn)
            .await?;
        Ok(ConsumeDecision {
            granted: granted == 1,
            tokens: tokens.parse().unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_redis_url() {
        assert!(RedisBucketStore::new("redis://127.0.0.1:6379").is_ok());
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisBucketStore::new("not a url").is_err());
    }
}
