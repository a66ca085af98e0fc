//! Error types for the stream gateway

use thiserror::Error;
use types::TopicId;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The presented credential did not verify to a principal
    #[error("credential rejected")]
    CredentialRejected,

    /// A valid principal that is not allowed to stream this topic
    #[error("principal not authorized for topic {topic}")]
    TopicUnauthorized { topic: TopicId },

    /// The topic does not exist in the directory
    #[error("topic {topic} not found")]
    TopicNotFound { topic: TopicId },

    /// Connection limit reached
    #[error("connection limit of {max} reached")]
    AtCapacity { max: usize },

    /// Persistence-layer collaborator failed
    #[error("topic directory error: {0}")]
    Directory(String),

    /// Upstream provider failed for a whole fetch
    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error("rate limiter error: {0}")]
    RateLimit(#[from] ratelimit::RateLimitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },
}
