//! Two-tier query cache.
//!
//! L1 is a process-local concurrent map; L2 is a shared [`KvStore`] keyed
//! `db_query:<fingerprint>`. The tiers are eventually consistent with each
//! other: concurrent requests computing the same fingerprint may both hit
//! the backing store and both write the cache, last write wins.
//!
//! # Staleness
//!
//! An L1 entry is never served past its TTL. A pattern invalidation on one
//! node clears that node's L1 and the matching L2 keys, but other nodes keep
//! serving their own L1 copies until those expire.
//!
//! [`KvStore`]: crate::kv::KvStore

pub mod stats;
pub mod tiered;
pub mod writer;

pub use stats::{CacheCounters, CacheCountersSnapshot, CacheStats, CacheTier};
pub use tiered::{CacheConfig, CachedValue, TieredCache};
pub use writer::BackgroundWriter;
