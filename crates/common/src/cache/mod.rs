//! Cache store abstraction
//!
//! Provides:
//! - An object-safe `CacheStore` trait (get / set-with-TTL / atomic set-if-absent)
//! - A Redis-backed store for shared deployments
//! - An in-memory store with passive expiry for tests and single-node use
//! - A typed `Cache` wrapper and key builders
//!
//! Three logical caches share this shape: the embedding cache, the
//! query-result cache, and the idempotency cache. Entries expire passively,
//! checked on read; no background sweep is required for correctness.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Object-safe cache store contract
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw value, or None on miss/expiry
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Set a raw value with a TTL
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically set a value only if the key is absent.
    /// Returns true if this call performed the write (first writer wins).
    async fn set_if_absent_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}

/// Redis-backed cache store
pub struct RedisStore {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> =
            conn.get(&full_key)
                .await
                .map_err(|e| AppError::CacheError {
                    message: format!("Failed to get key '{}': {}", full_key, e),
                })?;

        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.set_ex::<_, _, ()>(&full_key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        Ok(())
    }

    async fn set_if_absent_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        // SET NX EX is the atomic check-and-set; losers observe nil
        let reply: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set-if-absent key '{}': {}", full_key, e),
            })?;

        Ok(reply.is_some())
    }
}

/// In-memory cache store with passive expiry
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_if_absent_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let live = match entries.get(key) {
            Some((_, expires_at)) => *expires_at > Instant::now(),
            None => false,
        };
        if live {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }
}

/// Typed cache over any store, serializing values as JSON
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// In-memory cache, used by tests and the mock provider wiring
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get_raw(key).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                debug!(key = %key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with a TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;
        self.store.set_raw(key, &json, ttl).await
    }

    /// Atomically set a value only if the key is absent
    pub async fn set_if_absent<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool> {
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;
        self.store.set_if_absent_raw(key, &json, ttl).await
    }

    /// Set, but never fail the caller; cache write failures only warn
    pub async fn set_best_effort<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.set(key, value, ttl).await {
            warn!(key = %key, error = %e, "Cache write failed, continuing without cache");
        }
    }
}

/// Cache key builder helpers
pub mod keys {
    use uuid::Uuid;

    /// Build an embedding cache key
    pub fn embedding(model: &str, text_hash: &str) -> String {
        format!("embedding:{}:{}", model, text_hash)
    }

    /// Build a query-result cache key
    pub fn query_result(tenant_id: Uuid, domain: &str, query_hash: &str) -> String {
        format!("query:{}:{}:{}", tenant_id, domain, query_hash)
    }

    /// Build an idempotency cache key
    pub fn idempotency(tenant_id: Uuid, request_key: &str) -> String {
        format!("idempotency:{}:{}", tenant_id, request_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let cache = Cache::in_memory();
        cache
            .set("k", &vec![1u32, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();
        let got: Option<Vec<u32>> = cache.get("k").await.unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_passive_expiry_on_read() {
        let cache = Cache::in_memory();
        cache
            .set("gone", &"v".to_string(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got: Option<String> = cache.get("gone").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_set_if_absent_first_writer_wins() {
        let cache = Cache::in_memory();
        let first = cache
            .set_if_absent("race", &"winner".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let second = cache
            .set_if_absent("race", &"loser".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);

        let got: Option<String> = cache.get("race").await.unwrap();
        assert_eq!(got.as_deref(), Some("winner"));
    }

    #[tokio::test]
    async fn test_set_if_absent_after_expiry() {
        let cache = Cache::in_memory();
        cache
            .set_if_absent("k", &1u32, Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let did_set = cache
            .set_if_absent("k", &2u32, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(did_set);
    }

    #[test]
    fn test_key_builders() {
        let tenant_id = Uuid::new_v4();
        assert!(keys::embedding("text-embedding-3-small", "abc").starts_with("embedding:"));
        assert!(keys::query_result(tenant_id, "hr", "abc").contains(":hr:"));
        assert!(keys::idempotency(tenant_id, "req-1").starts_with("idempotency:"));
    }
}
