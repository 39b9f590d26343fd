pub mod database;
pub mod repository;
pub mod store;

pub use database::Database;
pub use repository::CacheRepository;
pub use store::{CacheStore, SqliteCacheStore};

#[cfg(test)]
pub use store::MockCacheStore;

use crate::error::CacheError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Typed front for a [`CacheStore`].
///
/// Reads never fail: a store error or an entry that no longer matches the
/// requested type is logged and reported as a miss.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.store.get_json(key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("Cache miss for {}", key);
                return None;
            }
            Err(e) => {
                warn!("Cache read for {} failed, treating as miss: {}", key, e);
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(decoded) => {
                debug!("Cache hit for {}", key);
                Some(decoded)
            }
            Err(e) => {
                warn!("Cached entry {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        self.store.set_json(key, &value, self.ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(key).await
    }
}
