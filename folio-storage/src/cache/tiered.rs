//! Two-tier query result cache.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::stats::{CacheCounters, CacheStats, CacheTier};
use super::writer::BackgroundWriter;
use crate::backing::QueryData;
use crate::fingerprint::QueryFingerprint;
use crate::kv::KvStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tiered cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a caller does not choose one.
    pub default_ttl: Duration,
    /// Minimum time between opportunistic L1 sweeps.
    pub sweep_interval: Duration,
    /// Namespace prepended to fingerprints to form L2 keys.
    pub key_prefix: String,
    /// Capacity of the L2 write queue.
    pub write_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            key_prefix: "db_query:".to_string(),
            write_queue_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Load configuration from `FOLIO_CACHE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: std::env::var("FOLIO_CACHE_DEFAULT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            sweep_interval: std::env::var("FOLIO_CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            key_prefix: std::env::var("FOLIO_CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            write_queue_capacity: std::env::var("FOLIO_CACHE_WRITE_QUEUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.write_queue_capacity),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    data: QueryData,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// L2 payload. The timestamp is wall-clock because other nodes read it.
#[derive(Debug, Serialize, Deserialize)]
struct L2Record {
    data: QueryData,
    stored_at_ms: i64,
    ttl_ms: u64,
}

impl L2Record {
    fn remaining(&self) -> Option<Duration> {
        let age_ms = Utc::now().timestamp_millis().saturating_sub(self.stored_at_ms).max(0) as u64;
        (age_ms <= self.ttl_ms).then(|| Duration::from_millis(self.ttl_ms - age_ms))
    }
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub data: QueryData,
    pub tier: CacheTier,
}

// ============================================================================
// TIERED CACHE
// ============================================================================

/// In-process L1 map in front of a shared L2 key-value store.
///
/// Reads check L1, then L2, backfilling L1 on an L2 hit. Writes land in L1
/// synchronously and are queued for L2 on a [`BackgroundWriter`]. Expiry is
/// lazy: entries are checked on lookup, and `store` occasionally sweeps
/// expired L1 entries.
///
/// Construct one per process and share it behind an `Arc`. Must be built
/// inside a tokio runtime because the L2 writer is spawned immediately.
pub struct TieredCache {
    l1: DashMap<String, CacheEntry>,
    l2: Arc<dyn KvStore>,
    writer: BackgroundWriter,
    counters: Arc<CacheCounters>,
    last_sweep: Mutex<Instant>,
    config: CacheConfig,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("l1_entries", &self.l1.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TieredCache {
    pub fn new(l2: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        let counters = Arc::new(CacheCounters::default());
        let writer = BackgroundWriter::spawn(
            Arc::clone(&l2),
            config.write_queue_capacity,
            Arc::clone(&counters),
        );
        Self {
            l1: DashMap::new(),
            l2,
            writer,
            counters,
            last_sweep: Mutex::new(Instant::now()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn l2_key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.config.key_prefix, fingerprint)
    }

    /// Look a fingerprint up in L1, then L2.
    ///
    /// L2 failures are logged and treated as a miss.
    pub async fn lookup(&self, fingerprint: &QueryFingerprint) -> Option<CachedValue> {
        let key = fingerprint.as_str();
        let now = Instant::now();

        if let Some(entry) = self.l1.get(key) {
            if !entry.is_expired(now) {
                self.counters.record_hit(CacheTier::L1);
                debug!(fingerprint = %key, "L1 cache hit");
                return Some(CachedValue {
                    data: entry.data.clone(),
                    tier: CacheTier::L1,
                });
            }
        }
        self.l1.remove_if(key, |_, entry| entry.is_expired(now));
        self.counters.record_miss(CacheTier::L1);

        let l2_key = self.l2_key(key);
        let raw = match self.l2.get(&l2_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.counters.record_miss(CacheTier::L2);
                return None;
            }
            Err(e) => {
                self.counters.record_l2_error();
                self.counters.record_miss(CacheTier::L2);
                warn!(key = %l2_key, error = %e, "L2 cache read failed, falling through");
                return None;
            }
        };

        let record: L2Record = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                self.counters.record_miss(CacheTier::L2);
                warn!(key = %l2_key, error = %e, "discarding undecodable L2 entry");
                self.writer.delete(l2_key);
                return None;
            }
        };

        let Some(remaining) = record.remaining() else {
            self.counters.record_miss(CacheTier::L2);
            return None;
        };

        self.counters.record_hit(CacheTier::L2);
        debug!(fingerprint = %key, "L2 cache hit, backfilling L1");
        self.l1.insert(
            key.to_string(),
            CacheEntry {
                data: record.data.clone(),
                stored_at: Instant::now(),
                ttl: remaining,
            },
        );
        Some(CachedValue {
            data: record.data,
            tier: CacheTier::L2,
        })
    }

    /// Store a result in L1 now and queue it for L2.
    pub fn store(&self, fingerprint: &QueryFingerprint, data: QueryData, ttl: Duration) {
        let key = fingerprint.as_str();
        let now = Instant::now();

        let record = L2Record {
            data: data.clone(),
            stored_at_ms: Utc::now().timestamp_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };

        self.l1.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: now,
                ttl,
            },
        );
        self.maybe_sweep(now);

        match serde_json::to_string(&record) {
            Ok(json) => self.writer.put(self.l2_key(key), json, ttl),
            Err(e) => warn!(fingerprint = %key, error = %e, "failed to encode L2 entry"),
        }
    }

    /// Invalidate cached entries.
    ///
    /// With a pattern, removes every L1 entry whose fingerprint contains it
    /// and queues deletion of the same keys in L2. Without one, clears L1
    /// only; L2 entries then age out on their TTL. Returns the number of L1
    /// entries removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let removed = match pattern {
            Some(pattern) => {
                let keys: Vec<String> = self
                    .l1
                    .iter()
                    .filter(|entry| entry.key().contains(pattern))
                    .map(|entry| entry.key().clone())
                    .collect();
                let mut removed = 0;
                for key in keys {
                    if self.l1.remove(&key).is_some() {
                        removed += 1;
                    }
                    self.writer.delete(self.l2_key(&key));
                }
                removed
            }
            None => {
                let removed = self.l1.len();
                self.l1.clear();
                removed
            }
        };
        self.counters.record_invalidation(removed as u64);
        debug!(?pattern, removed, "cache invalidated");
        removed
    }

    /// Remove expired L1 entries if the sweep interval has elapsed.
    fn maybe_sweep(&self, now: Instant) {
        // A concurrent store already sweeping is good enough.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.config.sweep_interval {
            return;
        }
        *last = now;
        drop(last);

        let before = self.l1.len();
        self.l1.retain(|_, entry| !entry.is_expired(now));
        let swept = before.saturating_sub(self.l1.len());
        if swept > 0 {
            debug!(swept, "swept expired L1 entries");
        }
    }

    /// Number of entries in L1, expired ones included.
    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_entries: self.l1.len(),
            counters: self.counters.snapshot(),
        }
    }

    /// Wait for queued L2 writes to be applied.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}
