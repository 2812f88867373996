//! Verification client: asks the server who a credential belongs to.
//!
//! Implementations classify the response and nothing more. They do not
//! retry and never touch the session cache; retry and fallback policy
//! belong to the coordinator.

pub mod http;

pub use http::{auth_headers, HttpVerifier, VerifierError};

use async_trait::async_trait;

use crate::session::User;

/// Classified result of one verification call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The credential is valid and the payload passed the validity predicate.
    Confirmed(User),
    /// The server says the credential is invalid or expired (HTTP 401).
    Rejected,
    /// Success status, but the payload is not a valid user.
    Malformed,
    /// Network failure, timeout, or a non-401 error status.
    Unavailable,
}

#[async_trait]
pub trait VerificationClient: Send + Sync {
    async fn verify(&self, credential: &str) -> VerificationOutcome;
}
