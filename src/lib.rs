//! session-coordinator - Client-side session verification across execution contexts
//!
//! This crate keeps one authoritative session per user agent with:
//! - A durable session cache shared by every context (redb, MessagePack records)
//! - Verification against a remote "who am I" endpoint, at most one at a time
//! - Degraded mode when the network or the payload can't be trusted
//! - Logout only after two rejections inside a short window
//! - Change notifications so every context re-reads the cache

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod notifier;
pub mod observer;
pub mod session;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod verifier;

pub use cache::SessionCache;
pub use coordinator::{Coordinator, CoordinatorError, Phase};
pub use observer::SessionObserver;
pub use session::{ChangeReason, Session, SessionStatus, User, VerificationFailure};
pub use verifier::{HttpVerifier, VerificationClient, VerificationOutcome};
