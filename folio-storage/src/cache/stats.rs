//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    L1,
    L2,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
        }
    }
}

/// Lock-free counters shared between the cache and its write worker.
#[derive(Debug, Default)]
pub struct CacheCounters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    l2_write_failures: AtomicU64,
    l2_writes_dropped: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self, tier: CacheTier) {
        match tier {
            CacheTier::L1 => self.l1_hits.fetch_add(1, Ordering::Relaxed),
            CacheTier::L2 => self.l2_hits.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_miss(&self, tier: CacheTier) {
        match tier {
            CacheTier::L1 => self.l1_misses.fetch_add(1, Ordering::Relaxed),
            CacheTier::L2 => self.l2_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_write_failure(&self) {
        self.l2_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_write_dropped(&self) {
        self.l2_writes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, removed: u64) {
        self.invalidations.fetch_add(removed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheCountersSnapshot {
        CacheCountersSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
            l2_write_failures: self.l2_write_failures.load(Ordering::Relaxed),
            l2_writes_dropped: self.l2_writes_dropped.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCountersSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// L2 reads that failed and were treated as misses.
    pub l2_errors: u64,
    pub l2_write_failures: u64,
    pub l2_writes_dropped: u64,
    /// L1 entries removed by pattern or full invalidation.
    pub invalidations: u64,
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub l1_entries: usize,
    #[serde(flatten)]
    pub counters: CacheCountersSnapshot,
}

impl CacheStats {
    /// Fraction of lookups answered by either tier (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.counters.l1_hits + self.counters.l2_hits;
        // Every lookup records exactly one L1 outcome.
        let total = self.counters.l1_hits + self.counters.l1_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
