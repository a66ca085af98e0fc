//! Rate-limited adapter over the upstream price provider.

use async_trait::async_trait;
use ratelimit::{AcquireOutcome, TokenBucket};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use types::PriceQuote;

use crate::Result;

/// The upstream price data provider.
///
/// A symbol the provider has no usable data for is simply absent from the
/// reply map. An `Err` means the whole fetch failed (provider unreachable,
/// malformed response), and `PriceSource` absorbs it.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, PriceQuote>>;
}

/// Wraps the provider with the distributed rate limiter.
///
/// Every upstream call first acquires a token; a limiter timeout or a
/// provider failure degrades to "no quotes this cycle" rather than an
/// error, so callers treat all three outcomes uniformly.
pub struct PriceSource {
    provider: Arc<dyn PriceProvider>,
    limiter: Arc<TokenBucket>,
    acquire_timeout: Duration,
}

impl PriceSource {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        limiter: Arc<TokenBucket>,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            limiter,
            acquire_timeout,
        }
    }

    /// Fetch quotes for `symbols`. Missing entries mean "unavailable this
    /// cycle"; an empty map means the whole cycle came up empty.
    pub async fn fetch(&self, symbols: &[String]) -> HashMap<String, PriceQuote> {
        if symbols.is_empty() {
            return HashMap::new();
        }

        match self.limiter.acquire(1.0, self.acquire_timeout).await {
            AcquireOutcome::Granted => {}
            AcquireOutcome::TimedOut => {
                metrics::counter!("gateway_fetches_throttled_total").increment(1);
                warn!("rate limiter timed out; skipping upstream fetch this cycle");
                return HashMap::new();
            }
        }

        match self.provider.fetch(symbols).await {
            Ok(quotes) => quotes,
            Err(e) => {
                metrics::counter!("gateway_fetches_failed_total").increment(1);
                warn!(error = %e, "upstream fetch failed");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayError;
    use ratelimit::{DegradedPolicy, MemoryBucketStore, TokenBucketConfig};
    use types::PriceQuote;

    struct FixedProvider;

    #[async_trait]
    impl PriceProvider for FixedProvider {
        async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, PriceQuote>> {
            Ok(symbols
                .iter()
                .map(|s| {
                    (
                        s.clone(),
                        PriceQuote::from_reference(s.clone(), 10.0, 9.0, chrono::Utc::now()),
                    )
                })
                .collect())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl PriceProvider for BrokenProvider {
        async fn fetch(&self, _symbols: &[String]) -> Result<HashMap<String, PriceQuote>> {
            Err(GatewayError::Upstream("connection reset".into()))
        }
    }

    fn limiter(capacity: f64, refill_per_sec: f64) -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(
            TokenBucketConfig {
                key: "test:upstream".into(),
                capacity,
                refill_per_sec,
                degraded_policy: DegradedPolicy::Deny,
            },
            Arc::new(MemoryBucketStore::new()),
        ))
    }

    #[tokio::test]
    async fn fetch_returns_quotes_when_granted() {
        let source = PriceSource::new(
            Arc::new(FixedProvider),
            limiter(10.0, 1.0),
            Duration::from_secs(1),
        );
        let quotes = source.fetch(&["AAA".into(), "BBB".into()]).await;
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes["AAA"].price, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_timeout_degrades_to_empty_cycle() {
        let limiter = limiter(1.0, 0.0);
        assert!(limiter
            .acquire(1.0, Duration::from_secs(1))
            .await
            .is_granted());

        let source = PriceSource::new(Arc::new(FixedProvider), limiter, Duration::from_millis(50));
        let quotes = source.fetch(&["AAA".into()]).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty_cycle() {
        let source = PriceSource::new(
            Arc::new(BrokenProvider),
            limiter(10.0, 1.0),
            Duration::from_secs(1),
        );
        let quotes = source.fetch(&["AAA".into()]).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn empty_symbol_list_skips_the_limiter() {
        let limiter = limiter(1.0, 0.0);
        let source = PriceSource::new(Arc::new(FixedProvider), limiter.clone(), Duration::ZERO);
        assert!(source.fetch(&[]).await.is_empty());
        // The single token is still there.
        let stats = limiter.get_stats().await.unwrap();
        assert!((stats.current_tokens - 1.0).abs() < 1e-6);
    }
}
