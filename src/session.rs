//! Session model: the coordinator's belief about who is logged in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity record returned by the verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
            role: None,
        }
    }

    /// A user is usable only when both identifying fields are present.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.email.trim().is_empty()
    }
}

/// How confident the coordinator is in the current identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionStatus {
    Authenticated,
    /// Authenticated from cache only; the most recent attempt did not reconfirm it.
    Degraded,
    Unauthenticated,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Session {
    pub credential: Option<String>,
    pub status: SessionStatus,
    pub user: Option<User>,
    /// Last successful verification
    pub verified_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A freshly confirmed session.
    pub fn authenticated(user: User, credential: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            credential: Some(credential.into()),
            status: SessionStatus::Authenticated,
            user: Some(user),
            verified_at: Some(at),
        }
    }

    /// Logged out: no identity, no credential.
    pub fn signed_out() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            ..Self::default()
        }
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    /// True when the cached user and credential could back an
    /// `Authenticated` or `Degraded` status.
    pub fn has_usable_identity(&self) -> bool {
        self.has_credential() && self.user.as_ref().is_some_and(User::is_valid)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Authenticated | SessionStatus::Degraded
        )
    }

    /// Only an unauthenticated session sends the user to the login entry point.
    /// `Degraded` never does.
    pub fn requires_login(&self) -> bool {
        self.status == SessionStatus::Unauthenticated
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Enforce the status invariant on records coming out of storage.
    pub fn normalized(self) -> Self {
        if self.is_authenticated() && !self.has_usable_identity() {
            tracing::warn!(status = ?self.status, "Cached session lacks a usable identity");
            return self.with_status(SessionStatus::Unauthenticated);
        }
        self
    }
}

/// Why a verification attempt did not confirm the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// Nothing to verify. A terminal state rather than an error.
    NoCredential,
    TransientUnavailable,
    MalformedPayload,
    /// First rejection inside the window; cached identity kept as degraded.
    UnauthorizedTransient,
    /// Second rejection inside the window; identity cleared.
    UnauthorizedPersistent,
}

impl VerificationFailure {
    pub fn clears_identity(&self) -> bool {
        matches!(self, VerificationFailure::UnauthorizedPersistent)
    }
}

/// Reason attached to every published cache change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    Confirmed,
    Failed(VerificationFailure),
    LoggedIn,
    LoggedOut,
}
