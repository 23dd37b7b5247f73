use rusqlite::{Connection, OptionalExtension};

use attrsync_core::{AttributeKey, AttributeValue, Origin, SessionId, UserId, Value, Version};

use crate::error::StorageError;
use crate::traits::{CacheEntry, CacheStore};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// SQLite-backed cache tier. File-backed in production so values survive a
/// reload; in-memory for tests and private browsing.
pub struct SqliteCache {
    conn: Connection,
}

impl SqliteCache {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn entry_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM attribute_cache", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

struct RawEntry {
    user_id: Vec<u8>,
    name: String,
    value: Vec<u8>,
    version: Vec<u8>,
    origin_session: Option<Vec<u8>>,
    checksum: Vec<u8>,
}

const SELECT_COLUMNS: &str =
    "SELECT user_id, name, value, version, origin_session, checksum FROM attribute_cache";

fn read_raw(row: &rusqlite::Row) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        user_id: row.get(0)?,
        name: row.get(1)?,
        value: row.get(2)?,
        version: row.get(3)?,
        origin_session: row.get(4)?,
        checksum: row.get(5)?,
    })
}

fn decode_entry(raw: RawEntry) -> Result<CacheEntry, StorageError> {
    let user = UserId::from_bytes(to_array::<16>(raw.user_id, "user_id")?);
    let key = AttributeKey::new(user, raw.name);

    if blake3::hash(&raw.value).as_bytes()[..] != raw.checksum[..] {
        return Err(StorageError::ChecksumMismatch(key.to_string()));
    }

    let value = Value::from_msgpack(&raw.value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let version = Version::from_slice(&raw.version)?;
    let origin = match raw.origin_session {
        Some(bytes) => {
            Origin::Session(SessionId::from_bytes(to_array::<16>(bytes, "origin_session")?))
        }
        None => Origin::Remote,
    };

    Ok(CacheEntry::new(key, AttributeValue::new(value, version, origin)))
}

impl CacheStore for SqliteCache {
    fn get(&self, key: &AttributeKey) -> Result<Option<CacheEntry>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE user_id = ?1 AND name = ?2"),
                rusqlite::params![key.user().as_bytes().as_slice(), key.name()],
                read_raw,
            )
            .optional()?;
        raw.map(decode_entry).transpose()
    }

    fn set(&mut self, entry: &CacheEntry) -> Result<bool, StorageError> {
        let value_bytes = entry
            .attribute
            .value
            .to_msgpack()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let checksum = blake3::hash(&value_bytes);
        let origin = entry.attribute.origin.session();

        let changed = self.conn.execute(
            "INSERT INTO attribute_cache (user_id, name, value, version, origin_session, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, name) DO UPDATE SET
                value = excluded.value,
                version = excluded.version,
                origin_session = excluded.origin_session,
                checksum = excluded.checksum,
                cached_at = excluded.cached_at
             WHERE excluded.version > attribute_cache.version",
            rusqlite::params![
                entry.key.user().as_bytes().as_slice(),
                entry.key.name(),
                value_bytes,
                &entry.attribute.version.to_bytes()[..],
                origin.as_ref().map(|s| s.as_bytes().as_slice()),
                checksum.as_bytes().as_slice(),
            ],
        )?;
        Ok(changed > 0)
    }

    fn load_user(&self, user: UserId) -> Result<Vec<CacheEntry>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY name"))?;
        let rows = stmt
            .query_map(rusqlite::params![user.as_bytes().as_slice()], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for raw in rows {
            let name = raw.name.clone();
            match decode_entry(raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        %user,
                        attribute = %name,
                        error = %e,
                        "skipping unreadable cache entry"
                    )
                }
            }
        }
        Ok(entries)
    }

    fn clear_user(&mut self, user: UserId) -> Result<usize, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM attribute_cache WHERE user_id = ?1",
            rusqlite::params![user.as_bytes().as_slice()],
        )?;
        Ok(removed)
    }
}
