//! Read-through query wrapper
//!
//! Binds a query function to a cache under a fixed query name, so call sites
//! get cached results without repeating the lookup/store dance.

use crate::cache::QueryCache;
use crate::invalidation::CacheInvalidator;
use crate::stats::CacheStats;
use query_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

/// A query function with built-in caching support
pub struct CachedQuery<P, T, F> {
    /// Shared cache handle
    cache: QueryCache,
    /// Name under which results are cached
    query_name: String,
    /// Fixed TTL, or `None` for the adaptive default
    ttl: Option<Duration>,
    /// The underlying query function
    query: F,
    _marker: PhantomData<fn(P) -> T>,
}

impl<P, T, F, Fut> CachedQuery<P, T, F>
where
    P: Serialize,
    T: Serialize + DeserializeOwned,
    F: Fn(&P) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    /// Wrap `query` so its results are cached under `query_name`
    pub fn new(cache: QueryCache, query_name: impl Into<String>, query: F) -> Self {
        Self {
            cache,
            query_name: query_name.into(),
            ttl: None,
            query,
            _marker: PhantomData,
        }
    }

    /// Cache results for a fixed duration instead of the adaptive TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Return the cached result for `params`, running the query on a miss
    pub async fn call(&self, params: &P) -> Result<T> {
        self.cache
            .get_or_fetch(&self.query_name, params, self.ttl, || (self.query)(params))
            .await
    }

    /// Run the query regardless of the cache and store the fresh result,
    /// falling back to the previous value if the query fails
    pub async fn refresh(&self, params: &P) -> Result<T> {
        self.cache
            .refresh(&self.query_name, || (self.query)(params), params)
            .await
    }

    /// Run the query without touching the cache
    pub async fn call_uncached(&self, params: &P) -> Result<T> {
        (self.query)(params).await
    }

    /// Drop every cached result of this query
    pub fn invalidate(&self) -> usize {
        self.cache.invalidate_query(&self.query_name)
    }

    /// Get the name results are cached under
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    /// Get the underlying cache
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use query_core::QueryError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserFilter {
        role: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        role: String,
    }

    fn users_query(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&UserFilter) -> std::future::Ready<Result<Vec<User>>> {
        move |filter: &UserFilter| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(vec![User {
                id: "u1".to_string(),
                role: filter.role.clone(),
            }]))
        }
    }

    #[tokio::test]
    async fn test_cached_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = CachedQuery::new(
            QueryCache::with_defaults(),
            "users",
            users_query(calls.clone()),
        );
        let admins = UserFilter {
            role: "admin".to_string(),
        };

        let first = query.call(&admins).await.unwrap();
        let second = query.call(&admins).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.cache_stats().hits, 1);
        assert_eq!(query.cache_stats().misses, 1);
    }

    #[tokio::test]
    async fn test_distinct_params_are_cached_separately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = CachedQuery::new(
            QueryCache::with_defaults(),
            "users",
            users_query(calls.clone()),
        );

        for role in ["admin", "student", "admin"] {
            let users = query
                .call(&UserFilter {
                    role: role.to_string(),
                })
                .await
                .unwrap();
            assert_eq!(users[0].role, role);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rerun() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = CachedQuery::new(
            QueryCache::with_defaults(),
            "users",
            users_query(calls.clone()),
        )
        .with_ttl(Duration::from_secs(30));
        let admins = UserFilter {
            role: "admin".to_string(),
        };

        query.call(&admins).await.unwrap();
        assert_eq!(query.invalidate(), 1);
        query.call(&admins).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let calls = AtomicUsize::new(0);
        let query = CachedQuery::new(
            QueryCache::new(CacheConfig::default()),
            "flaky",
            |_: &()| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err::<i32, _>(QueryError::execution("unavailable")))
            },
        );

        assert!(query.call(&()).await.is_err());
        assert!(query.call(&()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(query.cache().is_empty());
    }

    #[tokio::test]
    async fn test_uncached_call_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = CachedQuery::new(
            QueryCache::with_defaults(),
            "users",
            users_query(calls.clone()),
        );
        let admins = UserFilter {
            role: "admin".to_string(),
        };

        query.call_uncached(&admins).await.unwrap();
        query.refresh(&admins).await.unwrap();
        query.call(&admins).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(query.query_name(), "users");
    }
}
