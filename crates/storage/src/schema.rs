use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS attribute_cache (
    user_id BLOB NOT NULL CHECK (length(user_id) = 16),
    name TEXT NOT NULL,
    value BLOB NOT NULL,
    version BLOB NOT NULL CHECK (length(version) = 8),
    origin_session BLOB CHECK (origin_session IS NULL OR length(origin_session) = 16),
    checksum BLOB NOT NULL CHECK (length(checksum) = 32),
    cached_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    PRIMARY KEY (user_id, name)
);
";
