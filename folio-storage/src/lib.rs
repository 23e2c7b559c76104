//! Folio Storage - Query Cache and Executor
//!
//! Everything between a route handler and the relational store:
//!
//! - [`QueryFingerprint`] derives the cache and statistics key of a query.
//! - [`TieredCache`] keeps results in a process-local L1 map in front of a
//!   shared [`KvStore`] (L2).
//! - [`QueryExecutor`] classifies statements, consults the cache for reads,
//!   runs the rest under a best-effort timeout and records [`QueryStats`].
//! - [`BackingStore`] is the store boundary, implemented by
//!   [`PostgresStore`] and, for tests, [`MockBackingStore`].

pub mod backing;
pub mod cache;
pub mod executor;
pub mod fingerprint;
pub mod kv;
pub mod mock;
pub mod postgres;
pub mod stats;

pub use backing::{BackingStore, FetchMode, QueryData, QueryKind, Row, Statement, WriteAck};
pub use cache::{CacheConfig, CacheStats, CacheTier, CachedValue, TieredCache};
pub use executor::{
    BatchQuery, ExecutorConfig, QueryConfig, QueryEnvelope, QueryError, QueryExecutor,
    QueryOutcome,
};
pub use fingerprint::QueryFingerprint;
pub use kv::{InMemoryKvStore, KvStore};
#[cfg(feature = "redis")]
pub use kv::RedisKvStore;
pub use mock::{row, MockBackingStore};
pub use postgres::{DbConfig, PostgresStore};
pub use stats::{ExecutionOutcome, QueryStatEntry, QueryStats, QueryTotals};
