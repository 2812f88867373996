use chrono::{DateTime, Duration, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{bump_revision, decode_or_discard, read_revision, Database, DatabaseError};
use super::models::{CacheSnapshot, CacheUpdate, FailureWindow, LockAcquisition, VerificationLock};
use super::sessions::{load_session, store_session};
use super::tables::*;

impl Database {
    // ========================================================================
    // Verification lock
    // ========================================================================

    /// Get the persisted verification lock, stale or not
    pub fn get_verification_lock(&self) -> Result<Option<VerificationLock>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(COORDINATION)?;
        load_lock(&table)
    }

    /// Atomically claim the verification lock unless another attempt holds
    /// a live one. Reading and writing happen in one write transaction, so
    /// two contexts racing for the lock cannot both win.
    pub fn try_acquire_lock(
        &self,
        claim: &VerificationLock,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAcquisition, DatabaseError> {
        let write_txn = self.begin_write()?;
        let acquisition = {
            let mut table = write_txn.open_table(COORDINATION)?;
            let existing = load_lock(&table)?;

            match existing {
                Some(lock) if lock.attempt_id != claim.attempt_id && lock.is_held(now, stale_after) => {
                    LockAcquisition::Held(lock)
                }
                existing => {
                    let overrode_stale = existing.is_some_and(|lock| {
                        lock.active && lock.attempt_id != claim.attempt_id
                    });
                    let data = rmp_serde::to_vec_named(claim)?;
                    table.insert(LOCK_KEY, data.as_slice())?;
                    LockAcquisition::Acquired { overrode_stale }
                }
            }
        };
        write_txn.commit()?;
        Ok(acquisition)
    }

    /// Release the lock if `attempt_id` still holds it
    pub fn release_lock(&self, attempt_id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let released = release_if_held(&write_txn, attempt_id)?;
        write_txn.commit()?;
        Ok(released)
    }

    // ========================================================================
    // Failure window
    // ========================================================================

    pub fn get_failure_window(&self) -> Result<FailureWindow, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(COORDINATION)?;
        load_failure_window(&table)
    }

    pub fn put_failure_window(&self, window: &FailureWindow) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        store_failure_window(&write_txn, window)?;
        write_txn.commit()?;
        Ok(())
    }

    // ========================================================================
    // Verification commit
    // ========================================================================

    /// Apply the outcome of a verification attempt.
    ///
    /// Inside one write transaction: confirm `attempt_id` still holds the
    /// lock, hand the current snapshot to `decide`, write the session and
    /// failure window it returns, release the lock and bump the revision.
    /// Returns `None` without writing anything when the lock was lost
    /// (logout, login, or a stale override by another context).
    pub fn commit_verification<R>(
        &self,
        attempt_id: &str,
        decide: impl FnOnce(&CacheSnapshot) -> (CacheUpdate, R),
    ) -> Result<Option<(u64, R)>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let snapshot = {
            let session_table = write_txn.open_table(SESSION)?;
            let coordination = write_txn.open_table(COORDINATION)?;
            let meta = write_txn.open_table(META)?;
            CacheSnapshot {
                failure_window: load_failure_window(&coordination)?,
                lock: load_lock(&coordination)?,
                revision: read_revision(&meta)?,
                session: load_session(&session_table)?.unwrap_or_default(),
            }
        };

        let holds_lock = snapshot
            .lock
            .as_ref()
            .is_some_and(|lock| lock.active && lock.attempt_id == attempt_id);
        if !holds_lock {
            write_txn.abort()?;
            return Ok(None);
        }

        let (update, decision) = decide(&snapshot);
        store_session(&write_txn, &update.session)?;
        store_failure_window(&write_txn, &update.failure_window)?;
        release_if_held(&write_txn, attempt_id)?;
        let revision = bump_revision(&write_txn)?;
        write_txn.commit()?;

        Ok(Some((revision, decision)))
    }
}

pub(super) fn load_lock<T>(table: &T) -> Result<Option<VerificationLock>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table
        .get(LOCK_KEY)?
        .and_then(|data| decode_or_discard(LOCK_KEY, data.value())))
}

pub(super) fn load_failure_window<T>(table: &T) -> Result<FailureWindow, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table
        .get(FAILURE_WINDOW_KEY)?
        .and_then(|data| decode_or_discard(FAILURE_WINDOW_KEY, data.value()))
        .unwrap_or_default())
}

fn store_failure_window(
    write_txn: &WriteTransaction,
    window: &FailureWindow,
) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(COORDINATION)?;
    if window.last_unauthorized_at.is_none() {
        table.remove(FAILURE_WINDOW_KEY)?;
    } else {
        let data = rmp_serde::to_vec_named(window)?;
        table.insert(FAILURE_WINDOW_KEY, data.as_slice())?;
    }
    Ok(())
}

fn release_if_held(write_txn: &WriteTransaction, attempt_id: &str) -> Result<bool, DatabaseError> {
    let mut table = write_txn.open_table(COORDINATION)?;
    let held = load_lock(&table)?.is_some_and(|lock| lock.attempt_id == attempt_id);
    if held {
        table.remove(LOCK_KEY)?;
    }
    Ok(held)
}
