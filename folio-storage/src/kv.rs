//! Distributed key-value store abstraction.
//!
//! Both the query cache (`db_query:<fingerprint>`) and the permission
//! resolver (`user_permissions:<user_id>`) talk to the shared tier through
//! [`KvStore`]. Values are opaque strings; callers own the encoding.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use folio_core::CacheError;
use tokio::time::Instant;
use tracing::debug;

/// Shared key-value store with per-key TTL.
///
/// Implementations must be safe to call concurrently. Failures are reported
/// as [`CacheError`]; callers treat them as a degraded tier, never as fatal.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. Expired or missing keys yield `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        (**self).put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}

// ============================================================================
// IN-PROCESS STORE
// ============================================================================

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// Process-local stand-in for the distributed tier.
///
/// Used when no Redis URL is configured and in tests. Expiry is checked on
/// read against `tokio::time::Instant`, so paused-clock tests control it.
#[derive(Debug)]
pub struct InMemoryKvStore {
    entries: DashMap<String, StoredValue>,
    last_sweep: Mutex<Instant>,
    sweep_interval: Duration,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum time between sweeps of expired keys on `put`.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Drop expired keys if the sweep interval has elapsed.
    ///
    /// Keys that are never read again would otherwise stay resident.
    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.sweep_interval {
            return;
        }
        *last = now;
        drop(last);

        let before = self.entries.len();
        self.entries.retain(|_, v| v.expires_at > now);
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            debug!(swept, "swept expired in-memory KV entries");
        }
    }

    /// Number of keys held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|v| v.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        if let Some(stored) = self.entries.get(key) {
            if stored.expires_at > now {
                return Ok(Some(stored.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, v| v.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        self.maybe_sweep(now);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// REDIS STORE
// ============================================================================

#[cfg(feature = "redis")]
pub use self::redis_store::RedisKvStore;

#[cfg(feature = "redis")]
mod redis_store {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    /// Redis-backed distributed tier.
    ///
    /// `ConnectionManager` reconnects on its own; each call clones the
    /// handle, which is cheap and keeps `&self` methods lock-free.
    #[derive(Clone)]
    pub struct RedisKvStore {
        redis: ConnectionManager,
    }

    impl std::fmt::Debug for RedisKvStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisKvStore")
                .field("redis", &"<ConnectionManager>")
                .finish()
        }
    }

    impl RedisKvStore {
        pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
            let client = redis::Client::open(redis_url).map_err(unavailable)?;
            let redis = ConnectionManager::new(client).await.map_err(unavailable)?;
            Ok(Self { redis })
        }
    }

    fn unavailable(e: redis::RedisError) -> CacheError {
        CacheError::Unavailable {
            reason: e.to_string(),
        }
    }

    #[async_trait]
    impl KvStore for RedisKvStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.redis.clone().get(key).await.map_err(unavailable)
        }

        async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            // SET EX rejects 0; round sub-second TTLs up.
            let seconds = ttl.as_secs().max(1);
            self.redis
                .clone()
                .set_ex::<_, _, ()>(key, value, seconds)
                .await
                .map_err(unavailable)
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.redis
                .clone()
                .del::<_, ()>(key)
                .await
                .map_err(unavailable)
        }
    }
}

/// A distributed tier that is always down.
#[cfg(test)]
pub(crate) struct UnreachableKvStore;

#[cfg(test)]
#[async_trait]
impl KvStore for UnreachableKvStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable {
            reason: "connection refused".to_string(),
        })
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable {
            reason: "connection refused".to_string(),
        })
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable {
            reason: "connection refused".to_string(),
        })
    }
}
