//! Gateway configuration.
//!
//! Loaded from a TOML or JSON file, then overlaid with environment
//! variables (the deployment surface) and finally CLI flags in `main`.
//! Poll pacing and limiter settings are plain data handed to the
//! components at construction; nothing reads configuration globally.

use crate::worker::{PollSchedule, TradingWindow};
use crate::{GatewayError, Result};
use ratelimit::{DegradedPolicy, TokenBucketConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket server bind address
    pub bind_address: String,

    /// WebSocket server port
    pub port: u16,

    /// Maximum number of concurrent streaming connections
    pub max_connections: usize,

    /// Server-side keepalive ping interval in seconds
    pub heartbeat_interval_secs: u64,

    pub poll: PollConfig,

    pub limiter: LimiterConfig,

    /// Fixtures for the simulated collaborators (development mode).
    pub sim: SimConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            poll: PollConfig::default(),
            limiter: LimiterConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

/// Poll pacing. Intervals differ between trading hours and off-hours, and
/// between deployments (development typically polls faster).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub trading_interval_secs: u64,
    pub off_hours_interval_secs: u64,
    /// Opening hour of the upstream's trading window, UTC, inclusive.
    pub trading_open_hour: u32,
    /// Closing hour, UTC, exclusive.
    pub trading_close_hour: u32,
    pub weekdays_only: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            trading_interval_secs: 5,
            off_hours_interval_secs: 60,
            trading_open_hour: 13,
            trading_close_hour: 21,
            weekdays_only: true,
        }
    }
}

impl PollConfig {
    pub fn schedule(&self) -> PollSchedule {
        PollSchedule {
            trading: Duration::from_secs(self.trading_interval_secs),
            off_hours: Duration::from_secs(self.off_hours_interval_secs),
            window: Some(TradingWindow {
                open_hour: self.trading_open_hour,
                close_hour: self.trading_close_hour,
                weekdays_only: self.weekdays_only,
            }),
        }
    }
}

/// Where the shared token-bucket state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Shared Redis instance, required whenever more than one gateway
    /// process serves the same upstream quota.
    Redis { url: String },
    /// In-process store for single-instance and development deployments.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Rate-limit identifier shared by every process throttling the same
    /// upstream quota.
    pub key: String,
    pub capacity: f64,
    pub refill_per_sec: f64,
    /// How long one acquire may wait before the cycle degrades to
    /// "unavailable".
    pub acquire_timeout_secs: u64,
    pub degraded_policy: DegradedPolicy,
    pub store: StoreConfig,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key: "provider:upstream".to_string(),
            capacity: 10.0,
            refill_per_sec: 1.0,
            acquire_timeout_secs: 10,
            degraded_policy: DegradedPolicy::Deny,
            store: StoreConfig::default(),
        }
    }
}

impl LimiterConfig {
    pub fn bucket_config(&self) -> TokenBucketConfig {
        TokenBucketConfig {
            key: self.key.clone(),
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
            degraded_policy: self.degraded_policy,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Fixtures backing the simulated collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub topics: Vec<SimTopic>,
    pub tokens: Vec<SimToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTopic {
    pub id: i64,
    pub owner_user_id: i64,
    #[serde(default)]
    pub public: bool,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub holdings: Vec<SimHolding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimHolding {
    pub symbol: String,
    pub quantity: f64,
    #[serde(default)]
    pub cost_basis: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimToken {
    pub token: String,
    pub user_id: i64,
    pub email: String,
}

impl GatewayConfig {
    /// Load from a TOML or JSON file, selected by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            Ok(serde_json::from_str(&contents)?)
        } else {
            toml::from_str(&contents).map_err(|e| GatewayError::Configuration {
                message: format!("{}: {e}", path.display()),
            })
        }
    }

    /// Overlay recognized environment variables onto this configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("STREAM_GATEWAY_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = env_parsed::<u16>("STREAM_GATEWAY_PORT") {
            self.port = v;
        }
        if let Some(v) = env_parsed::<usize>("STREAM_GATEWAY_MAX_CONNECTIONS") {
            self.max_connections = v;
        }
        if let Some(v) = env_parsed::<u64>("STREAM_GATEWAY_POLL_TRADING_SECS") {
            self.poll.trading_interval_secs = v;
        }
        if let Some(v) = env_parsed::<u64>("STREAM_GATEWAY_POLL_OFF_HOURS_SECS") {
            self.poll.off_hours_interval_secs = v;
        }
        if let Some(v) = env_parsed::<f64>("STREAM_GATEWAY_RATE_CAPACITY") {
            self.limiter.capacity = v;
        }
        if let Some(v) = env_parsed::<f64>("STREAM_GATEWAY_RATE_REFILL_PER_SEC") {
            self.limiter.refill_per_sec = v;
        }
        if let Some(v) = env_string("STREAM_GATEWAY_REDIS_URL") {
            self.limiter.store = StoreConfig::Redis { url: v };
        }
        if let Some(v) = env_string("STREAM_GATEWAY_DEGRADED_POLICY") {
            match v.as_str() {
                "deny" => self.limiter.degraded_policy = DegradedPolicy::Deny,
                "local_throttle" => {
                    self.limiter.degraded_policy = DegradedPolicy::LocalThrottle
                }
                other => warn!(value = other, "unrecognized degraded policy; keeping configured value"),
            }
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
