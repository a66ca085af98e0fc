//! Topic directory boundary (persistence layer).

use crate::Result;
use async_trait::async_trait;
use types::{Principal, TopicId, TopicSnapshot};

/// Resolves topics against the persistence layer.
///
/// Implementations acquire and release their own backing resource (a
/// pooled database session or similar) inside each call. Workers call
/// `resolve` once per poll cycle and hold nothing between cycles, so a
/// slow topic can never pin a pooled handle across a sleep.
#[async_trait]
pub trait TopicDirectory: Send + Sync {
    /// Check that `principal` may stream `topic` (owner or public topic).
    ///
    /// Errors with [`GatewayError::TopicNotFound`](crate::GatewayError::TopicNotFound)
    /// or [`GatewayError::TopicUnauthorized`](crate::GatewayError::TopicUnauthorized).
    async fn authorize(&self, topic: TopicId, principal: &Principal) -> Result<()>;

    /// The topic's current symbols and holdings overlays.
    async fn resolve(&self, topic: TopicId) -> Result<TopicSnapshot>;
}
