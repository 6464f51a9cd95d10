//! Request Batcher for Query Engine
//!
//! Groups near-simultaneous calls for the same query name into a single
//! multi-item upstream call, then hands each caller its own result.
//!
//! # Example
//!
//! ```ignore
//! use query_batcher::QueryBatcher;
//!
//! let batcher: QueryBatcher<String, User> = QueryBatcher::with_defaults();
//!
//! // Both calls land in the same batch and share one round trip
//! let (a, b) = tokio::join!(
//!     batcher.add("users-batch", fetch_users, "id1".to_string()),
//!     batcher.add("users-batch", fetch_users, "id2".to_string()),
//! );
//! ```

pub mod batcher;
pub mod config;

pub use batcher::QueryBatcher;
pub use config::BatcherConfig;
