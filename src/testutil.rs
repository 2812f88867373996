//! Shared test helpers for the `#[cfg(test)]` modules in the crate.

use chrono::Utc;
use tempfile::TempDir;

use crate::config::PolicyConfig;
use crate::session::{Session, User};
use crate::storage::Database;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard; the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// Policy with round numbers that are easy to reason about in tests.
pub fn test_policy() -> PolicyConfig {
    PolicyConfig {
        lock_poll_interval_ms: 10,
        lock_stale_after_ms: 5_000,
        recheck_interval_ms: 60_000,
        refresh_interval_ms: 0,
        rejection_window_ms: 10_000,
    }
}

pub fn make_user(id: &str, email: &str) -> User {
    User::new(id, email)
}

/// An authenticated session verified just now, with credential `tok_{id}`.
pub fn authenticated_session(id: &str, email: &str) -> Session {
    Session::authenticated(make_user(id, email), format!("tok_{id}"), Utc::now())
}
