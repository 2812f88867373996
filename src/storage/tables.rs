use redb::TableDefinition;

/// Cached session: "current" -> Session (MessagePack)
pub const SESSION: TableDefinition<&str, &[u8]> = TableDefinition::new("session");

/// Coordinator bookkeeping: "verification_lock" / "failure_window" -> record (MessagePack)
pub const COORDINATION: TableDefinition<&str, &[u8]> = TableDefinition::new("coordination");

/// Cache metadata: "revision" -> u64
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const SESSION_KEY: &str = "current";
pub const LOCK_KEY: &str = "verification_lock";
pub const FAILURE_WINDOW_KEY: &str = "failure_window";
pub const REVISION_KEY: &str = "revision";
