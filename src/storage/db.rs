use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// Durable store behind the session cache. Cheap to clone; all clones
/// share the same redb handle.
#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("session.redb");
        let db = RedbDatabase::create(db_path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSION)?;
            let _ = write_txn.open_table(COORDINATION)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    /// Current cache revision (0 before the first write)
    pub fn revision(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(META)?;
        read_revision(&table)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

pub(super) fn read_revision<T>(table: &T) -> Result<u64, DatabaseError>
where
    T: ReadableTable<&'static str, u64>,
{
    Ok(table.get(REVISION_KEY)?.map(|v| v.value()).unwrap_or(0))
}

/// Increment the revision inside an open write transaction.
pub(super) fn bump_revision(write_txn: &WriteTransaction) -> Result<u64, DatabaseError> {
    let mut table = write_txn.open_table(META)?;
    let next = read_revision(&table)? + 1;
    table.insert(REVISION_KEY, next)?;
    Ok(next)
}

/// Decode a MessagePack record, treating corrupt bytes as absent.
pub(super) fn decode_or_discard<T: serde::de::DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> Option<T> {
    match rmp_serde::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding undecodable cache record");
            None
        }
    }
}
