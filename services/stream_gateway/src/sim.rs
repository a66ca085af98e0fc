//! Simulated collaborators for local development and integration tests.
//!
//! Production deployments embed the gateway as a library and inject real
//! implementations (database-backed directory, vendor price client, auth
//! service). These stand-ins are wired by `main` from the `[sim]` config
//! section so the binary streams real-looking data out of the box.

use crate::auth::CredentialVerifier;
use crate::config::SimConfig;
use crate::directory::TopicDirectory;
use crate::source::PriceProvider;
use crate::{GatewayError, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use types::{Principal, PriceQuote, SymbolOverlay, TopicId, TopicSnapshot};

/// Random-walk quote generator. Each symbol gets a deterministic base
/// price seeded from its name, then drifts a fraction of a percent per
/// fetch; the base price doubles as the previous-close reference.
pub struct SimPriceProvider {
    state: Mutex<HashMap<String, SymbolState>>,
}

struct SymbolState {
    price: f64,
    reference: f64,
    rng: StdRng,
}

impl SymbolState {
    fn seeded(symbol: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        let seed = hasher.finish();
        // Base price in a plausible 10..=500 band.
        let base = 10.0 + (seed % 4900) as f64 / 10.0;
        Self {
            price: base,
            reference: base,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SimPriceProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SimPriceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceProvider for SimPriceProvider {
    async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, PriceQuote>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        Ok(symbols
            .iter()
            .map(|symbol| {
                let s = state
                    .entry(symbol.clone())
                    .or_insert_with(|| SymbolState::seeded(symbol));
                let drift: f64 = s.rng.gen_range(-0.005..0.005);
                s.price = (s.price * (1.0 + drift)).max(0.01);
                (
                    symbol.clone(),
                    PriceQuote::from_reference(symbol.clone(), s.price, s.reference, now),
                )
            })
            .collect())
    }
}

struct TopicRecord {
    owner_user_id: i64,
    public: bool,
    snapshot: TopicSnapshot,
}

/// Directory over the `[sim.topics]` fixtures.
pub struct StaticDirectory {
    topics: HashMap<TopicId, TopicRecord>,
}

impl StaticDirectory {
    pub fn from_config(config: &SimConfig) -> Self {
        let topics = config
            .topics
            .iter()
            .map(|t| {
                let mut snapshot = TopicSnapshot::new(t.symbols.clone());
                for holding in &t.holdings {
                    snapshot.overlays.insert(
                        holding.symbol.clone(),
                        SymbolOverlay {
                            quantity: holding.quantity,
                            cost_basis: holding.cost_basis,
                        },
                    );
                }
                (
                    TopicId(t.id),
                    TopicRecord {
                        owner_user_id: t.owner_user_id,
                        public: t.public,
                        snapshot,
                    },
                )
            })
            .collect();
        Self { topics }
    }
}

#[async_trait]
impl TopicDirectory for StaticDirectory {
    async fn authorize(&self, topic: TopicId, principal: &Principal) -> Result<()> {
        let record = self
            .topics
            .get(&topic)
            .ok_or(GatewayError::TopicNotFound { topic })?;
        if record.public || record.owner_user_id == principal.user_id {
            Ok(())
        } else {
            Err(GatewayError::TopicUnauthorized { topic })
        }
    }

    async fn resolve(&self, topic: TopicId) -> Result<TopicSnapshot> {
        self.topics
            .get(&topic)
            .map(|r| r.snapshot.clone())
            .ok_or(GatewayError::TopicNotFound { topic })
    }
}

/// Verifier over the `[sim.tokens]` table.
pub struct StaticVerifier {
    tokens: HashMap<String, Principal>,
}

impl StaticVerifier {
    pub fn from_config(config: &SimConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| (t.token.clone(), Principal::new(t.user_id, t.email.clone())))
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Principal> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(GatewayError::CredentialRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimHolding, SimToken, SimTopic};

    fn sim_config() -> SimConfig {
        SimConfig {
            topics: vec![
                SimTopic {
                    id: 1,
                    owner_user_id: 10,
                    public: false,
                    symbols: vec!["AAA".into(), "BBB".into()],
                    holdings: vec![SimHolding {
                        symbol: "AAA".into(),
                        quantity: 3.0,
                        cost_basis: Some(50.0),
                    }],
                },
                SimTopic {
                    id: 2,
                    owner_user_id: 10,
                    public: true,
                    symbols: vec!["CCC".into()],
                    holdings: vec![],
                },
            ],
            tokens: vec![SimToken {
                token: "alpha".into(),
                user_id: 10,
                email: "alpha@example.com".into(),
            }],
        }
    }

    #[tokio::test]
    async fn provider_prices_are_deterministic_per_symbol() {
        let a = SimPriceProvider::new();
        let b = SimPriceProvider::new();
        let symbols = vec!["AAA".to_string()];
        let qa = a.fetch(&symbols).await.unwrap();
        let qb = b.fetch(&symbols).await.unwrap();
        assert_eq!(qa["AAA"].price, qb["AAA"].price);
        assert!(qa["AAA"].price > 0.0);
    }

    #[tokio::test]
    async fn provider_walks_from_the_reference_price() {
        let provider = SimPriceProvider::new();
        let symbols = vec!["AAA".to_string()];
        let first = provider.fetch(&symbols).await.unwrap();
        let second = provider.fetch(&symbols).await.unwrap();
        // Reference stays pinned while the price drifts.
        let ref_first = first["AAA"].price - first["AAA"].delta;
        let ref_second = second["AAA"].price - second["AAA"].delta;
        assert!((ref_first - ref_second).abs() < 1e-9);
    }

    #[tokio::test]
    async fn directory_authorizes_owner_and_public_only() {
        let directory = StaticDirectory::from_config(&sim_config());
        let owner = Principal::new(10, "alpha@example.com");
        let stranger = Principal::new(99, "other@example.com");

        assert!(directory.authorize(TopicId(1), &owner).await.is_ok());
        assert!(matches!(
            directory.authorize(TopicId(1), &stranger).await,
            Err(GatewayError::TopicUnauthorized { .. })
        ));
        // Public topic admits anyone.
        assert!(directory.authorize(TopicId(2), &stranger).await.is_ok());
        assert!(matches!(
            directory.authorize(TopicId(9), &owner).await,
            Err(GatewayError::TopicNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn directory_resolves_symbols_and_overlays() {
        let directory = StaticDirectory::from_config(&sim_config());
        let snapshot = directory.resolve(TopicId(1)).await.unwrap();
        assert_eq!(snapshot.symbols, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(snapshot.overlays["AAA"].quantity, 3.0);
    }

    #[tokio::test]
    async fn verifier_accepts_known_tokens_only() {
        let verifier = StaticVerifier::from_config(&sim_config());
        let principal = verifier.verify("alpha").await.unwrap();
        assert_eq!(principal.user_id, 10);
        assert!(matches!(
            verifier.verify("bogus").await,
            Err(GatewayError::CredentialRejected)
        ));
    }
}
