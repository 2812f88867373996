use redb::{ReadableTable, WriteTransaction};

use super::coordination::{load_failure_window, load_lock};
use super::db::{bump_revision, decode_or_discard, read_revision, Database, DatabaseError};
use super::models::CacheSnapshot;
use super::tables::*;
use crate::session::Session;

impl Database {
    // ========================================================================
    // Session operations
    // ========================================================================

    /// Get the cached session, if any
    pub fn get_session(&self) -> Result<Option<Session>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SESSION)?;
        load_session(&table)
    }

    /// Replace the cached session. Returns the new revision.
    pub fn put_session(&self, session: &Session) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        store_session(&write_txn, session)?;
        let revision = bump_revision(&write_txn)?;
        write_txn.commit()?;
        Ok(revision)
    }

    /// Replace the cached session only if no write has landed since
    /// `expected_revision`. Returns the new revision, or `None` (writing
    /// nothing) when the cache has moved on.
    pub fn put_session_if_unchanged(
        &self,
        session: &Session,
        expected_revision: u64,
    ) -> Result<Option<u64>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let current = {
            let meta = write_txn.open_table(META)?;
            read_revision(&meta)?
        };
        if current != expected_revision {
            write_txn.abort()?;
            return Ok(None);
        }

        store_session(&write_txn, session)?;
        let revision = bump_revision(&write_txn)?;
        write_txn.commit()?;
        Ok(Some(revision))
    }

    /// Store a freshly logged-in session and reset all verification
    /// bookkeeping in the same transaction. Any attempt still holding the
    /// lock loses it and will not be able to commit.
    pub fn put_login_session(&self, session: &Session) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        store_session(&write_txn, session)?;
        {
            let mut table = write_txn.open_table(COORDINATION)?;
            table.remove(LOCK_KEY)?;
            table.remove(FAILURE_WINDOW_KEY)?;
        }
        let revision = bump_revision(&write_txn)?;
        write_txn.commit()?;
        Ok(revision)
    }

    /// Replace the session with a signed-out record and clear the
    /// verification lock and failure window
    pub fn clear_session(&self) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        store_session(&write_txn, &Session::signed_out())?;
        {
            let mut table = write_txn.open_table(COORDINATION)?;
            table.remove(LOCK_KEY)?;
            table.remove(FAILURE_WINDOW_KEY)?;
        }
        let revision = bump_revision(&write_txn)?;
        write_txn.commit()?;
        Ok(revision)
    }

    /// Read session, lock, failure window and revision from one consistent view
    pub fn snapshot(&self) -> Result<CacheSnapshot, DatabaseError> {
        let read_txn = self.begin_read()?;
        let session_table = read_txn.open_table(SESSION)?;
        let coordination = read_txn.open_table(COORDINATION)?;
        let meta = read_txn.open_table(META)?;

        Ok(CacheSnapshot {
            failure_window: load_failure_window(&coordination)?,
            lock: load_lock(&coordination)?,
            revision: read_revision(&meta)?,
            session: load_session(&session_table)?.unwrap_or_default(),
        })
    }
}

pub(super) fn load_session<T>(table: &T) -> Result<Option<Session>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table
        .get(SESSION_KEY)?
        .and_then(|data| decode_or_discard::<Session>(SESSION_KEY, data.value()))
        .map(Session::normalized))
}

pub(super) fn store_session(
    write_txn: &WriteTransaction,
    session: &Session,
) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(SESSION)?;
    let data = rmp_serde::to_vec_named(session)?;
    table.insert(SESSION_KEY, data.as_slice())?;
    Ok(())
}
