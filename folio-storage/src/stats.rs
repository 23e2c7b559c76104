//! Per-fingerprint query statistics.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::fingerprint::QueryFingerprint;

/// Longest query text kept on a stats entry.
const SAMPLE_QUERY_MAX_CHARS: usize = 200;

/// How one executor invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Answered from cache without touching the store.
    CacheHit,
    Success,
    Failure,
}

/// Accumulated statistics for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatEntry {
    pub fingerprint: String,
    /// Leading part of the first query text seen for this fingerprint.
    pub sample_query: String,
    pub invocation_count: u64,
    pub cumulative_latency_ms: f64,
    pub max_latency_ms: f64,
    pub error_count: u64,
    pub cache_hits: u64,
}

impl QueryStatEntry {
    fn new(fingerprint: &QueryFingerprint, query: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            sample_query: query.trim().chars().take(SAMPLE_QUERY_MAX_CHARS).collect(),
            invocation_count: 0,
            cumulative_latency_ms: 0.0,
            max_latency_ms: 0.0,
            error_count: 0,
            cache_hits: 0,
        }
    }

    /// Mean latency over every invocation, cache hits included.
    pub fn mean_latency_ms(&self) -> f64 {
        if self.invocation_count == 0 {
            0.0
        } else {
            self.cumulative_latency_ms / self.invocation_count as f64
        }
    }
}

/// Totals across every fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTotals {
    pub fingerprints: usize,
    pub invocations: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cumulative_latency_ms: f64,
}

/// Process-lifetime statistics table keyed by fingerprint.
#[derive(Debug, Default)]
pub struct QueryStats {
    entries: DashMap<QueryFingerprint, QueryStatEntry>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation. Cache hits should pass `Duration::ZERO`.
    pub fn record(
        &self,
        fingerprint: &QueryFingerprint,
        query: &str,
        elapsed: Duration,
        outcome: ExecutionOutcome,
    ) {
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        let mut entry = self
            .entries
            .entry(fingerprint.clone())
            .or_insert_with(|| QueryStatEntry::new(fingerprint, query));
        entry.invocation_count += 1;
        entry.cumulative_latency_ms += latency_ms;
        if latency_ms > entry.max_latency_ms {
            entry.max_latency_ms = latency_ms;
        }
        match outcome {
            ExecutionOutcome::CacheHit => entry.cache_hits += 1,
            ExecutionOutcome::Failure => entry.error_count += 1,
            ExecutionOutcome::Success => {}
        }
    }

    pub fn get(&self, fingerprint: &QueryFingerprint) -> Option<QueryStatEntry> {
        self.entries.get(fingerprint).map(|e| e.clone())
    }

    /// Every entry, most expensive (by cumulative latency) first.
    pub fn snapshot(&self) -> Vec<QueryStatEntry> {
        let mut entries: Vec<QueryStatEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.cumulative_latency_ms.total_cmp(&a.cumulative_latency_ms));
        entries
    }

    /// Entries whose mean latency exceeds `threshold`, slowest first.
    pub fn slow_queries(&self, threshold: Duration) -> Vec<QueryStatEntry> {
        let threshold_ms = threshold.as_secs_f64() * 1000.0;
        let mut slow: Vec<QueryStatEntry> = self
            .entries
            .iter()
            .filter(|e| e.mean_latency_ms() > threshold_ms)
            .map(|e| e.value().clone())
            .collect();
        slow.sort_by(|a, b| b.mean_latency_ms().total_cmp(&a.mean_latency_ms()));
        slow
    }

    pub fn totals(&self) -> QueryTotals {
        self.entries.iter().fold(
            QueryTotals {
                fingerprints: self.entries.len(),
                ..QueryTotals::default()
            },
            |mut acc, e| {
                acc.invocations += e.invocation_count;
                acc.errors += e.error_count;
                acc.cache_hits += e.cache_hits;
                acc.cumulative_latency_ms += e.cumulative_latency_ms;
                acc
            },
        )
    }

    pub fn reset(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
