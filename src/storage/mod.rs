mod coordination;
pub mod db;
pub mod models;
mod sessions;
mod tables;

pub use db::{Database, DatabaseError};
pub use models::{CacheSnapshot, CacheUpdate, FailureWindow, LockAcquisition, VerificationLock};
pub use tables::*;
