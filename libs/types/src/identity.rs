//! Identity types: topics and authenticated principals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one logical broadcast group (a watchlist).
///
/// Topics have no persistent record in this core. One exists exactly while
/// it has at least one live subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(pub i64);

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TopicId {
    fn from(id: i64) -> Self {
        TopicId(id)
    }
}

/// An authenticated caller, produced by the credential verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
}

impl Principal {
    pub fn new(user_id: i64, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_id_serializes_as_bare_integer() {
        let json = serde_json::to_string(&TopicId(42)).unwrap();
        assert_eq!(json, "42");
        let back: TopicId = serde_json::from_str("42").unwrap();
        assert_eq!(back, TopicId(42));
    }
}
