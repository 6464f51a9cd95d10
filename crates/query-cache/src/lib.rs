//! Adaptive Query Result Cache
//!
//! This crate provides a cache for named query results that sits between
//! application logic and a slow upstream data source.
//!
//! # Features
//!
//! - **Canonical Keys**: Parameters are canonicalized, so field order never splits entries
//! - **Adaptive TTL**: Keys read often in the last minute live up to 3x longer
//! - **Scored Eviction**: Blends hit count with idle time when the cache is full
//! - **Background Sweep**: Periodically drops expired entries
//! - **Persistence**: Best-effort snapshots to a pluggable key/value store
//! - **Stale-While-Revalidate**: `refresh` serves the old value if the upstream fails
//! - **Prefetch**: Fire-and-forget warming with priority delays
//! - **Statistics**: Entry counts, hit counters and approximate memory use
//!
//! # Example
//!
//! ```ignore
//! use query_cache::{CacheConfig, QueryCache};
//! use serde_json::json;
//!
//! let cache = QueryCache::new(CacheConfig::default());
//! let params = json!({"status": "active"});
//!
//! let courses: Vec<Course> = cache
//!     .get_or_fetch("courses", &params, None, || fetch_courses(&params))
//!     .await?;
//!
//! // After a write, drop every cached read of that query
//! cache.invalidate("courses");
//! ```

pub mod access;
pub mod cache;
pub mod cached;
pub mod clock;
pub mod config;
pub mod invalidation;
pub mod key;
pub mod persistence;
pub mod stats;

pub use cache::{CacheEntry, PrefetchPriority, QueryCache};
pub use cached::CachedQuery;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use invalidation::{CacheInvalidator, InvalidationPattern};
pub use key::CacheKey;
pub use persistence::{FileStore, MemoryStore, PersistentStore};
pub use stats::{CacheMetrics, CacheStats};
