use crate::error::CacheError;
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Opens (or creates) the cache database. Accepts both a bare path and a
    /// `sqlite:` URL.
    pub fn open(db_path: &str) -> Result<Self, CacheError> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), CacheError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at
             ON cache_entries(expires_at)",
            [],
        )?;

        Ok(())
    }
}
