//! Query Batching Example
//!
//! Demonstrates coalescing concurrent lookups into a single backend round
//! trip, and layering the batcher underneath the cache.

use anyhow::Result;
use examples_package::{init_logging, CourseBackend, User};
use query_batcher::{BatcherConfig, QueryBatcher};
use query_cache::{CacheConfig, QueryCache};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(false)?;
    println!("=== Query Batching Example ===\n");

    let backend = Arc::new(CourseBackend::new(Duration::from_millis(20)));

    // Example 1: Concurrent lookups share one round trip
    coalescing(&backend).await?;

    // Example 2: Batcher behind the cache
    cache_over_batcher(&backend).await?;

    println!("\n=== All batching examples completed! ===");
    Ok(())
}

type UsersFuture = Pin<Box<dyn Future<Output = query_core::Result<Vec<User>>> + Send>>;

fn users_executor(backend: &Arc<CourseBackend>) -> impl FnOnce(Vec<String>) -> UsersFuture + Send + 'static {
    let backend = Arc::clone(backend);
    move |ids| Box::pin(async move { backend.users_by_ids(ids).await })
}

/// Example 1: Three lookups inside one window become one backend call
async fn coalescing(backend: &Arc<CourseBackend>) -> Result<()> {
    println!("--- Example 1: Coalescing ---\n");

    let batcher: QueryBatcher<String, User> = QueryBatcher::new(BatcherConfig::default());
    let before = backend.round_trips();

    let (a, b, c) = tokio::join!(
        batcher.add("users-batch", users_executor(backend), "u1".to_string()),
        batcher.add("users-batch", users_executor(backend), "u2".to_string()),
        batcher.add("users-batch", users_executor(backend), "u3".to_string()),
    );

    for user in [a?, b?, c?] {
        println!("Resolved {} -> {}", user.id, user.name);
    }
    println!("Backend round trips: {}\n", backend.round_trips() - before);

    batcher.close();
    Ok(())
}

/// Example 2: Cache misses fall through to the batcher
async fn cache_over_batcher(backend: &Arc<CourseBackend>) -> Result<()> {
    println!("--- Example 2: Cache Over Batcher ---\n");

    let cache = QueryCache::new(CacheConfig::default().with_persistence(false));
    let batcher: QueryBatcher<String, User> =
        QueryBatcher::new(BatcherConfig::default().with_batch_delay(Duration::from_millis(10)));
    let before = backend.round_trips();

    let lookup = |id: &'static str| {
        let cache = cache.clone();
        let batcher = batcher.clone();
        let executor = users_executor(backend);
        async move {
            cache
                .get_or_fetch("user", &id, None, || {
                    batcher.add("users-batch", executor, id.to_string())
                })
                .await
        }
    };

    // Cold: both ids miss and share one batch
    let (first, second) = tokio::join!(lookup("u1"), lookup("u2"));
    println!("Cold lookups: {} and {}", first?.name, second?.name);

    // Warm: served from the cache, no batch is opened
    let (first, second) = tokio::join!(lookup("u1"), lookup("u2"));
    println!("Warm lookups: {} and {}", first?.name, second?.name);

    println!("Backend round trips: {}", backend.round_trips() - before);
    println!("Cache hits: {}\n", cache.get_stats().hits);

    batcher.close();
    cache.close();
    Ok(())
}
