//! Query Caching Example
//!
//! Demonstrates read-through caching, invalidation, stale-while-revalidate
//! refreshes, prefetching and persistence across restarts.

use anyhow::Result;
use examples_package::{init_logging, Course, CourseBackend};
use query_cache::{CacheConfig, CachedQuery, MemoryStore, PersistentStore, PrefetchPriority, QueryCache};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(false)?;
    println!("=== Query Caching Example ===\n");

    let backend = Arc::new(CourseBackend::new(Duration::from_millis(40)));

    // Example 1: Read-through caching
    read_through(&backend).await?;

    // Example 2: Invalidation after a write
    invalidation(&backend).await?;

    // Example 3: Refresh with stale fallback
    refresh_with_fallback(&backend).await?;

    // Example 4: Prefetching
    prefetching(&backend).await?;

    // Example 5: Persistence across restarts
    persistence().await?;

    println!("\n=== All caching examples completed! ===");
    Ok(())
}

/// Example 1: Repeated reads are served from the cache
async fn read_through(backend: &Arc<CourseBackend>) -> Result<()> {
    println!("--- Example 1: Read-Through Caching ---\n");

    let cache = QueryCache::new(CacheConfig::default().with_persistence(false));
    let before = backend.round_trips();

    for _ in 0..3 {
        // Parameter order does not matter for the cache key
        let params = json!({"status": "active", "limit": 10});
        let courses: Vec<Course> = cache
            .get_or_fetch("courses", &params, None, || backend.courses_by_status("active"))
            .await?;
        println!("Fetched {} courses", courses.len());
    }
    let reordered = json!({"limit": 10, "status": "active"});
    println!(
        "Reordered params hit the same entry: {}",
        cache.contains("courses", &reordered)
    );

    let stats = cache.get_stats();
    println!("Backend round trips: {}", backend.round_trips() - before);
    println!("Hits: {}, misses: {}", stats.hits, stats.misses);
    println!("Request hit rate: {:.1}%\n", stats.request_hit_rate() * 100.0);

    cache.close();
    Ok(())
}

/// Example 2: Writes drop every cached read of the affected query
async fn invalidation(backend: &Arc<CourseBackend>) -> Result<()> {
    println!("--- Example 2: Invalidation ---\n");

    let cache = QueryCache::new(CacheConfig::default().with_persistence(false));
    let courses = CachedQuery::new(cache.clone(), "courses", |status: &String| {
        let backend = Arc::clone(backend);
        let status = status.clone();
        async move { backend.courses_by_status(&status).await }
    })
    .with_ttl(Duration::from_secs(60));

    for status in ["active", "draft", "archived"] {
        courses.call(&status.to_string()).await?;
    }
    cache.set("users", &json!([{"id": "u1"}]), &json!({}), None)?;
    println!("Entries before invalidation: {}", cache.len());

    let removed = courses.invalidate();
    println!("Removed {} course entries", removed);
    println!("Entries after invalidation: {}\n", cache.len());

    cache.close();
    Ok(())
}

/// Example 3: A failed refresh keeps serving the previous value
async fn refresh_with_fallback(backend: &Arc<CourseBackend>) -> Result<()> {
    println!("--- Example 3: Refresh With Stale Fallback ---\n");

    let cache = QueryCache::new(CacheConfig::default().with_persistence(false));
    let params = json!({"status": "broken"});
    cache.set(
        "courses",
        &vec![Course {
            id: "c0".to_string(),
            title: "Cached course".to_string(),
            status: "broken".to_string(),
        }],
        &params,
        None,
    )?;

    let courses: Vec<Course> = cache
        .refresh("courses", || backend.courses_by_status("broken"), &params)
        .await?;
    println!("Backend failed, served {:?}\n", courses[0].title);

    cache.close();
    Ok(())
}

/// Example 4: Warm the cache before the data is needed
async fn prefetching(backend: &Arc<CourseBackend>) -> Result<()> {
    println!("--- Example 4: Prefetching ---\n");

    let cache = QueryCache::new(CacheConfig::default().with_persistence(false));
    let params = json!({"status": "upcoming"});

    let task_backend = Arc::clone(backend);
    let scheduled = cache.prefetch(
        "courses",
        move || async move { task_backend.courses_by_status("upcoming").await },
        &params,
        PrefetchPriority::High,
    );
    println!("Prefetch scheduled: {}", scheduled);

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("Warm after prefetch: {}\n", cache.contains("courses", &params));

    cache.close();
    Ok(())
}

/// Example 5: Live entries survive a restart through the store
async fn persistence() -> Result<()> {
    println!("--- Example 5: Persistence ---\n");

    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let config = CacheConfig::default();

    let cache = QueryCache::open(config.clone(), Arc::clone(&store)).await;
    cache.set("courses", &json!(["c1", "c2"]), &json!({"page": 1}), None)?;
    cache.persist().await;
    cache.close();

    let restarted = QueryCache::open(config, store).await;
    let restored: Option<Vec<String>> = restarted.get("courses", &json!({"page": 1}));
    println!("Restored after restart: {:?}", restored);

    restarted.close();
    Ok(())
}
