//! Best-effort expiring KV cache with an atomic counter.
//!
//! Consumers must treat a miss as "unknown, recompute": entries may
//! evaporate at any time. Counters are stored as decimal strings so the
//! plain `get` path can read them back.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use thiserror::Error;

use crate::config::settings;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// `get` returns `Ok(None)` on a miss; a miss is never an error.
/// `increment` has memcache semantics: a missing key is created at
/// `initial` and then `delta` is applied, atomically across handlers.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<()>;
    async fn increment(&self, key: &str, delta: i64, initial: i64) -> CacheResult<i64>;
}

/// Redis-backed cache for production.
pub struct RedisCache {
    client: redis::Client,
    ttl: u64,
}

impl RedisCache {
    pub fn open(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        Ok(RedisCache {
            client,
            ttl: settings().cache_ttl,
        })
    }

    async fn conn(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(backend)
    }

    async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex(key, value, self.ttl).await.map_err(backend)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.del(key).await.map_err(backend)
    }

    async fn increment(&self, key: &str, delta: i64, initial: i64) -> CacheResult<i64> {
        let mut conn = self.conn().await?;
        // Seed the initial value only when absent; INCRBY itself is atomic,
        // so concurrent seeders still converge on initial + sum(deltas).
        let _: bool = conn.set_nx(key, initial).await.map_err(backend)?;
        conn.incr(key, delta).await.map_err(backend)
    }
}

/// In-memory cache for tests and local runs.
#[derive(Default)]
pub struct MemCache {
    entries: DashMap<String, Vec<u8>>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, initial: i64) -> CacheResult<i64> {
        // The entry guard holds the shard lock, making the read-modify-write
        // atomic with respect to other increments.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| initial.to_string().into_bytes());
        let current: i64 = std::str::from_utf8(&entry)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CacheError::Backend(format!("non-numeric counter {:?}", key)))?;
        let next = current + delta;
        *entry = next.to_string().into_bytes();
        Ok(next)
    }
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}
