//! JSON wire frames exchanged with streaming clients.
//!
//! The channel is push-only: the server emits `price_update` frames (and
//! `pong` replies), clients send keepalive pings. Anything else inbound is
//! ignored by the gateway.

use crate::TopicId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of a broadcast payload. All value fields are nullable; `null`
/// means the upstream provider had no data for that symbol this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceItem {
    pub symbol: String,
    pub price: Option<f64>,
    pub delta: Option<f64>,
    pub delta_percent: Option<f64>,
    pub quantity: Option<f64>,
    pub market_value: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

impl PriceItem {
    /// A row for a symbol the provider returned nothing for.
    pub fn unavailable(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            delta: None,
            delta_percent: None,
            quantity: None,
            market_value: None,
            unrealized_pnl: None,
        }
    }
}

/// One broadcast payload for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub topic_id: TopicId,
    pub items: Vec<PriceItem>,
    pub timestamp: DateTime<Utc>,
}

/// Server-to-client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    PriceUpdate(PriceUpdate),
    Pong,
}

/// Client-to-server frames the gateway recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}
