//! Credential verification boundary.
//!
//! Token validation itself belongs to the auth layer; the gateway only
//! consumes the verdict. Rejection is an error variant, not a panic; the
//! connection handler maps it to an explicit close code.

use crate::Result;
use async_trait::async_trait;
use types::Principal;

/// Verifies an opaque credential token into a principal.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns the authenticated principal, or
    /// [`GatewayError::CredentialRejected`](crate::GatewayError::CredentialRejected).
    async fn verify(&self, token: &str) -> Result<Principal>;
}
