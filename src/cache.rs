//! The session cache: durable storage plus change publication.
//!
//! Contexts that should see each other's session (several windows of one
//! application) share one `SessionCache`. Each committed write bumps the
//! revision and is published on the shared [`Notifier`].

use std::path::Path;

use chrono::{DateTime, Duration, Utc};

use crate::notifier::{Notifier, SessionChange};
use crate::session::{ChangeReason, Session};
use crate::storage::{
    CacheSnapshot, CacheUpdate, Database, DatabaseError, LockAcquisition, VerificationLock,
};

#[derive(Debug, Clone)]
pub struct SessionCache {
    db: Database,
    notifier: Notifier,
}

impl SessionCache {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Open (or create) the cache in `data_dir` with a fresh notifier.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open(data_dir)?, Notifier::default()))
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The cached session, or an empty one when nothing is stored.
    pub fn read(&self) -> Result<Session, DatabaseError> {
        Ok(self.db.get_session()?.unwrap_or_default())
    }

    pub fn snapshot(&self) -> Result<CacheSnapshot, DatabaseError> {
        self.db.snapshot()
    }

    pub fn write(
        &self,
        session: &Session,
        origin: &str,
        reason: ChangeReason,
    ) -> Result<u64, DatabaseError> {
        let revision = self.db.put_session(session)?;
        self.publish(origin, reason, revision);
        Ok(revision)
    }

    /// Write `session` only if the cache is still at `expected_revision`.
    /// Publishes nothing when the write is refused.
    pub fn write_if_unchanged(
        &self,
        session: &Session,
        expected_revision: u64,
        origin: &str,
        reason: ChangeReason,
    ) -> Result<Option<u64>, DatabaseError> {
        let written = self.db.put_session_if_unchanged(session, expected_revision)?;
        if let Some(revision) = written {
            self.publish(origin, reason, revision);
        }
        Ok(written)
    }

    /// Write a logged-in session, resetting lock and failure window.
    pub fn write_login(&self, session: &Session, origin: &str) -> Result<u64, DatabaseError> {
        let revision = self.db.put_login_session(session)?;
        self.publish(origin, ChangeReason::LoggedIn, revision);
        Ok(revision)
    }

    /// Sign out: drop identity and credential and all verification bookkeeping.
    pub fn clear(&self, origin: &str, reason: ChangeReason) -> Result<u64, DatabaseError> {
        let revision = self.db.clear_session()?;
        self.publish(origin, reason, revision);
        Ok(revision)
    }

    pub fn try_acquire_lock(
        &self,
        claim: &VerificationLock,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAcquisition, DatabaseError> {
        self.db.try_acquire_lock(claim, now, stale_after)
    }

    pub fn verification_lock(&self) -> Result<Option<VerificationLock>, DatabaseError> {
        self.db.get_verification_lock()
    }

    pub fn release_lock(&self, attempt_id: &str) -> Result<bool, DatabaseError> {
        self.db.release_lock(attempt_id)
    }

    /// Commit a verification result. `decide` returns the update to write
    /// and the reason to publish. `None` means the attempt lost its lock
    /// and nothing was written.
    pub fn commit_verification(
        &self,
        attempt_id: &str,
        origin: &str,
        decide: impl FnOnce(&CacheSnapshot) -> (CacheUpdate, ChangeReason),
    ) -> Result<Option<(u64, ChangeReason)>, DatabaseError> {
        let committed = self.db.commit_verification(attempt_id, decide)?;
        if let Some((revision, reason)) = committed {
            self.publish(origin, reason, revision);
        }
        Ok(committed)
    }

    fn publish(&self, origin: &str, reason: ChangeReason, revision: u64) {
        self.notifier.publish(SessionChange {
            origin: origin.to_string(),
            reason,
            revision,
        });
    }
}
