//! Query executor: cache consultation, best-effort timeout, statistics.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::backing::{BackingStore, FetchMode, QueryData, QueryKind, Row, Statement, WriteAck};
use crate::cache::TieredCache;
use crate::fingerprint::QueryFingerprint;
use crate::stats::{ExecutionOutcome, QueryStats};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Process-wide executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout used when a query does not set its own.
    pub default_timeout: Duration,
    /// Executions slower than this are logged at warn level.
    pub slow_query_threshold: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(10_000),
            slow_query_threshold: Duration::from_millis(1_000),
        }
    }
}

impl ExecutorConfig {
    /// Load from `FOLIO_QUERY_TIMEOUT_MS` and `FOLIO_SLOW_QUERY_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: std::env::var("FOLIO_QUERY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            slow_query_threshold: std::env::var("FOLIO_SLOW_QUERY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_query_threshold),
        }
    }
}

/// Per-query options.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Consult and populate the cache for reads.
    pub cache: bool,
    /// TTL for a cached result; the cache default when `None`.
    pub cache_ttl: Option<Duration>,
    /// Cache under this key instead of the computed fingerprint.
    pub cache_key: Option<String>,
    /// Timeout; the executor default when `None`.
    pub timeout: Option<Duration>,
    /// After a successful write, invalidate cache keys containing this.
    pub invalidates: Option<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache: true,
            cache_ttl: None,
            cache_key: None,
            timeout: None,
            invalidates: None,
        }
    }
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_cache() -> Self {
        Self {
            cache: false,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn invalidates(mut self, pattern: impl Into<String>) -> Self {
        self.invalidates = Some(pattern.into());
        self
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Executor failure. Returned, never panicked or propagated past the
/// executor as anything else.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The store did not answer in time. The statement may still complete:
    /// treat the outcome as unknown, not rolled back.
    #[error("Query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Backing store error: {message}")]
    BackingStore { message: String },
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Timeout { .. } => "TIMEOUT",
            QueryError::BackingStore { .. } => "DATABASE_ERROR",
        }
    }
}

/// A successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub data: QueryData,
    pub from_cache: bool,
    pub fingerprint: QueryFingerprint,
    pub elapsed: Duration,
}

/// Uniform `{success, data?, error?, fromCache}` shape for callers that
/// forward executor results as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub from_cache: bool,
}

impl From<Result<QueryOutcome, QueryError>> for QueryEnvelope {
    fn from(result: Result<QueryOutcome, QueryError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                data: Some(outcome.data.into_json()),
                error: None,
                code: None,
                from_cache: outcome.from_cache,
            },
            Err(e) => Self {
                success: false,
                data: None,
                code: Some(e.code()),
                error: Some(e.to_string()),
                from_cache: false,
            },
        }
    }
}

/// One entry of a batch.
#[derive(Debug, Clone)]
pub struct BatchQuery {
    pub statement: Statement,
    pub config: QueryConfig,
}

impl BatchQuery {
    pub fn new(statement: Statement, config: QueryConfig) -> Self {
        Self { statement, config }
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Runs statements against a [`BackingStore`] through the [`TieredCache`].
///
/// Cheap to clone; clones share the store, cache and statistics.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn BackingStore>,
    cache: Arc<TieredCache>,
    stats: Arc<QueryStats>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(
        store: Arc<dyn BackingStore>,
        cache: Arc<TieredCache>,
        stats: Arc<QueryStats>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            cache,
            stats,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<QueryStats> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute one statement.
    ///
    /// Cacheable reads are answered from the cache when possible. Everything
    /// else runs against the store under a timeout. Every call, cache hit or
    /// not, is recorded in the statistics under the query's fingerprint.
    pub async fn execute(
        &self,
        statement: Statement,
        config: &QueryConfig,
    ) -> Result<QueryOutcome, QueryError> {
        let fingerprint = QueryFingerprint::compute(&statement.sql, &statement.params);
        let kind = statement.kind();
        let cacheable = config.cache && kind.is_read() && statement.mode != FetchMode::Run;
        let cache_key = match &config.cache_key {
            Some(key) => QueryFingerprint::from_key(key.clone()),
            None => fingerprint.clone(),
        };

        if cacheable {
            if let Some(hit) = self.cache.lookup(&cache_key).await {
                if hit.data.matches_mode(statement.mode) {
                    self.stats.record(
                        &fingerprint,
                        &statement.sql,
                        Duration::ZERO,
                        ExecutionOutcome::CacheHit,
                    );
                    return Ok(QueryOutcome {
                        data: hit.data,
                        from_cache: true,
                        fingerprint,
                        elapsed: Duration::ZERO,
                    });
                }
                debug!(key = %cache_key, "cached value has a different shape, re-executing");
            }
        }

        let timeout = config.timeout.unwrap_or(self.config.default_timeout);
        let started = Instant::now();
        let result = self.run_with_timeout(&statement, timeout).await;
        let elapsed = started.elapsed();

        match result {
            Ok(data) => {
                self.stats
                    .record(&fingerprint, &statement.sql, elapsed, ExecutionOutcome::Success);
                if elapsed > self.config.slow_query_threshold {
                    warn!(
                        fingerprint = %fingerprint,
                        elapsed_ms = elapsed.as_millis() as u64,
                        query = %statement.sql,
                        "slow query"
                    );
                }
                if cacheable {
                    let ttl = config.cache_ttl.unwrap_or(self.cache.config().default_ttl);
                    self.cache.store(&cache_key, data.clone(), ttl);
                } else if kind == QueryKind::Write {
                    if let Some(pattern) = &config.invalidates {
                        self.cache.invalidate(Some(pattern.as_str()));
                    }
                }
                Ok(QueryOutcome {
                    data,
                    from_cache: false,
                    fingerprint,
                    elapsed,
                })
            }
            Err(e) => {
                self.stats
                    .record(&fingerprint, &statement.sql, elapsed, ExecutionOutcome::Failure);
                error!(fingerprint = %fingerprint, error = %e, "query failed");
                Err(e)
            }
        }
    }

    /// Race the store call against a timer.
    ///
    /// The store call runs on its own task so that losing the race abandons
    /// it rather than cancelling it mid-flight.
    async fn run_with_timeout(
        &self,
        statement: &Statement,
        timeout: Duration,
    ) -> Result<QueryData, QueryError> {
        let store = Arc::clone(&self.store);
        let owned = statement.clone();
        let handle = tokio::spawn(async move { store.execute(&owned).await });

        match tokio::time::timeout(timeout, handle).await {
            Err(_) => Err(QueryError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(join_error)) => Err(QueryError::BackingStore {
                message: format!("query task failed: {join_error}"),
            }),
            Ok(Ok(Err(storage_error))) => Err(QueryError::BackingStore {
                message: storage_error.to_string(),
            }),
            Ok(Ok(Ok(data))) => Ok(data),
        }
    }

    /// Every row of a read.
    pub async fn all(
        &self,
        sql: &str,
        params: Vec<Value>,
        config: &QueryConfig,
    ) -> Result<Vec<Row>, QueryError> {
        match self.execute(Statement::all(sql, params), config).await?.data {
            QueryData::Rows(rows) => Ok(rows),
            other => Err(unexpected_shape("rows", &other)),
        }
    }

    /// The first row of a read, if any.
    pub async fn first(
        &self,
        sql: &str,
        params: Vec<Value>,
        config: &QueryConfig,
    ) -> Result<Option<Row>, QueryError> {
        match self.execute(Statement::first(sql, params), config).await?.data {
            QueryData::Row(row) => Ok(row),
            other => Err(unexpected_shape("row", &other)),
        }
    }

    /// Execute for side effects.
    pub async fn run(
        &self,
        sql: &str,
        params: Vec<Value>,
        config: &QueryConfig,
    ) -> Result<WriteAck, QueryError> {
        match self.execute(Statement::run(sql, params), config).await?.data {
            QueryData::Ack(ack) => Ok(ack),
            other => Err(unexpected_shape("ack", &other)),
        }
    }

    /// Execute independent queries concurrently.
    ///
    /// Returns one result per input, in input order. A failure stays in its
    /// own slot and never affects the others.
    pub async fn execute_batch(
        &self,
        queries: Vec<BatchQuery>,
    ) -> Vec<Result<QueryOutcome, QueryError>> {
        join_all(
            queries
                .into_iter()
                .map(|q| async move { self.execute(q.statement, &q.config).await }),
        )
        .await
    }
}

fn unexpected_shape(expected: &str, got: &QueryData) -> QueryError {
    let got = match got {
        QueryData::Rows(_) => "rows",
        QueryData::Row(_) => "row",
        QueryData::Ack(_) => "ack",
    };
    QueryError::BackingStore {
        message: format!("store returned {got}, expected {expected}"),
    }
}
