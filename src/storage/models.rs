use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Mutual-exclusion record for an in-flight verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationLock {
    pub active: bool,
    /// Unique per verification attempt; only this attempt may commit or release
    pub attempt_id: String,
    /// The context that started the attempt
    pub context_id: String,
    pub started_at: DateTime<Utc>,
}

impl VerificationLock {
    pub fn new(
        attempt_id: impl Into<String>,
        context_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            active: true,
            attempt_id: attempt_id.into(),
            context_id: context_id.into(),
            started_at,
        }
    }

    /// Stale once older than the timeout, whether or not `active` was cleared.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.started_at > stale_after
    }

    pub fn is_held(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.active && !self.is_stale(now, stale_after)
    }
}

/// Result of a compare-and-set lock acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired { overrode_stale: bool },
    Held(VerificationLock),
}

/// Tracks the most recent unauthorized outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FailureWindow {
    pub last_unauthorized_at: Option<DateTime<Utc>>,
}

impl FailureWindow {
    pub fn rejected_at(at: DateTime<Utc>) -> Self {
        Self {
            last_unauthorized_at: Some(at),
        }
    }

    /// True when a rejection at `now` would be the second one inside `window`.
    pub fn is_open(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_unauthorized_at
            .is_some_and(|last| now - last <= window)
    }
}

/// Everything the coordinator reads before deciding a transition
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub failure_window: FailureWindow,
    pub lock: Option<VerificationLock>,
    pub revision: u64,
    pub session: Session,
}

/// Records written when a verification commits
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdate {
    pub failure_window: FailureWindow,
    pub session: Session,
}
