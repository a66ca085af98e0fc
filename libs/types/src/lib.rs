//! Shared domain types for the price streaming core.
//!
//! Identity types, per-cycle quote data, and the JSON wire frames exchanged
//! with streaming clients. Kept dependency-light so both the rate limiter
//! and the gateway service can build on it.

pub mod frames;
pub mod identity;
pub mod quote;

pub use frames::{ClientFrame, PriceItem, PriceUpdate, StreamFrame};
pub use identity::{Principal, TopicId};
pub use quote::{PriceQuote, SymbolOverlay, TopicSnapshot};
