use crate::error::CacheError;
use rusqlite::{OptionalExtension, params};

pub struct CacheRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> CacheRepository<'a> {
    const UPSERT_ENTRY: &'static str = "INSERT INTO cache_entries (key, value, expires_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at";

    const GET_LIVE_ENTRY: &'static str =
        "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2";

    const DELETE_ENTRY: &'static str = "DELETE FROM cache_entries WHERE key = ?1";

    const DELETE_EXPIRED: &'static str = "DELETE FROM cache_entries WHERE expires_at <= ?1";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, key: &str, value: &str, expires_at: i64) -> Result<(), CacheError> {
        self.conn
            .execute(Self::UPSERT_ENTRY, params![key, value, expires_at])?;
        Ok(())
    }

    /// The stored value, unless it is missing or expired at `now`.
    pub fn get_live(&self, key: &str, now: i64) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self
            .conn
            .query_row(Self::GET_LIVE_ENTRY, params![key, now], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.conn.execute(Self::DELETE_ENTRY, params![key])?;
        Ok(removed > 0)
    }

    pub fn delete_expired(&self, now: i64) -> Result<usize, CacheError> {
        let removed = self.conn.execute(Self::DELETE_EXPIRED, params![now])?;
        Ok(removed)
    }
}
