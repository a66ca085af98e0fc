//! Per-cycle quote data and topic snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One symbol's price data for one poll cycle.
///
/// A symbol the upstream provider had no usable data for is represented by
/// an absent entry in the provider's reply map, never by an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
    /// Change versus the provider's reference price (previous close).
    pub delta: f64,
    pub delta_percent: f64,
    pub as_of: DateTime<Utc>,
}

impl PriceQuote {
    /// Build a quote from a price and its reference price, deriving deltas.
    pub fn from_reference(
        symbol: impl Into<String>,
        price: f64,
        reference: f64,
        as_of: DateTime<Utc>,
    ) -> Self {
        let delta = price - reference;
        let delta_percent = if reference != 0.0 {
            delta / reference * 100.0
        } else {
            0.0
        };
        Self {
            symbol: symbol.into(),
            price,
            delta,
            delta_percent,
            as_of,
        }
    }
}

/// Per-symbol holdings overlay contributed by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolOverlay {
    pub quantity: f64,
    pub cost_basis: Option<f64>,
}

/// A topic's tracked symbols plus overlay data, resolved fresh each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    /// Symbols in presentation order.
    pub symbols: Vec<String>,
    pub overlays: HashMap<String, SymbolOverlay>,
}

impl TopicSnapshot {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            overlays: HashMap::new(),
        }
    }

    pub fn with_overlay(mut self, symbol: impl Into<String>, overlay: SymbolOverlay) -> Self {
        self.overlays.insert(symbol.into(), overlay);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_derived_from_reference_price() {
        let q = PriceQuote::from_reference("AAA", 110.0, 100.0, Utc::now());
        assert_eq!(q.delta, 10.0);
        assert!((q.delta_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_reference_price_yields_zero_percent() {
        let q = PriceQuote::from_reference("AAA", 5.0, 0.0, Utc::now());
        assert_eq!(q.delta_percent, 0.0);
    }
}
