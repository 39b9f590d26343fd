use super::database::Database;
use super::repository::CacheRepository;
use crate::error::CacheError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Key-value store holding JSON documents with a time-to-live.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set_json(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct SqliteCacheStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteCacheStore {
    pub fn open(db_path: &str) -> Result<Self, CacheError> {
        Ok(Self::from_database(Database::open(db_path)?))
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Ok(Self::from_database(Database::in_memory()?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn prune_expired(&self) -> Result<usize, CacheError> {
        let now = unix_now();
        self.with_repository(move |repo| repo.delete_expired(now))
            .await
    }

    async fn with_repository<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&CacheRepository<'_>) -> Result<T, CacheError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|e| CacheError::Task(format!("cache lock poisoned: {e}")))?;
            f(&CacheRepository::new(&db.conn))
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let key = key.to_string();
        let now = unix_now();
        let raw = self
            .with_repository(move |repo| repo.get_live(&key, now))
            .await?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(CacheError::from))
            .transpose()
    }

    async fn set_json(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let key = key.to_string();
        let raw = serde_json::to_string(value)?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = unix_now().saturating_add(ttl_secs);

        debug!("Caching {} until {}", key, expires_at);
        self.with_repository(move |repo| repo.upsert(&key, &raw, expires_at))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_string();
        self.with_repository(move |repo| repo.delete(&key).map(|_| ()))
            .await
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
