//! Real-Time Price Stream Gateway
//!
//! Fans live price updates out to many WebSocket clients grouped by topic
//! (watchlist), sharing a single upstream poll per topic regardless of
//! subscriber count, behind a distributed token-bucket limiter protecting
//! the upstream quota across gateway processes.
//!
//! The registry owns all connection and worker state behind one guard;
//! workers are spawned on a topic's first subscriber and torn down (with
//! awaited cancellation) on its last. Production embeds this crate and
//! injects real collaborator implementations; the binary wires simulated
//! ones for development.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod registry;
pub mod server;
pub mod sim;
pub mod source;
pub mod worker;

pub use auth::CredentialVerifier;
pub use config::GatewayConfig;
pub use directory::TopicDirectory;
pub use error::{GatewayError, Result};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use server::{Collaborators, GatewayServer};
pub use source::{PriceProvider, PriceSource};
pub use worker::{PollSchedule, TradingWindow};
