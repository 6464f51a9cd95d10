//! Adaptive query result cache

use crate::access::AccessHistory;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::invalidation::{CacheInvalidator, InvalidationPattern};
use crate::key::CacheKey;
use crate::persistence::{decode_snapshot, encode_snapshot, PersistentStore};
use crate::stats::{CacheMetrics, CacheStats};
use lru::LruCache;
use parking_lot::Mutex;
use query_core::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest period the background sweep runs at
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Entry stored in the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached query result
    pub value: Arc<Value>,
    /// Epoch millis when this entry was written
    pub created_at: u64,
    /// Effective lifetime in milliseconds
    pub ttl_ms: u64,
    /// Successful reads since creation, starting at 1
    pub hit_count: u64,
    /// Epoch millis of the most recent read
    pub last_accessed_at: u64,
}

impl CacheEntry {
    /// Create a new cache entry written at `now`
    pub fn new(value: Arc<Value>, now: u64, ttl: Duration) -> Self {
        Self {
            value,
            created_at: now,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            hit_count: 1,
            last_accessed_at: now,
        }
    }

    /// An entry is live while its age is strictly below its TTL
    pub fn is_live(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) < self.ttl_ms
    }

    /// Get the effective lifetime
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Get the time elapsed since the entry was written
    pub fn age(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.created_at))
    }

    /// Hit count minus minutes since last access; lowest is evicted first
    fn eviction_score(&self, now: u64) -> f64 {
        let idle_minutes = now.saturating_sub(self.last_accessed_at) as f64 / 60_000.0;
        self.hit_count as f64 - idle_minutes
    }
}

/// How soon a prefetch runs after being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefetchPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl PrefetchPriority {
    /// Get the wait before the prefetch runs
    pub fn delay(self) -> Duration {
        match self {
            PrefetchPriority::High => Duration::ZERO,
            PrefetchPriority::Medium => Duration::from_millis(100),
            PrefetchPriority::Low => Duration::from_millis(500),
        }
    }
}

/// Entry table and access history, guarded together
struct CacheState {
    /// Iteration runs from most to least recently used
    entries: LruCache<CacheKey, CacheEntry>,
    history: AccessHistory,
}

struct Shared {
    config: CacheConfig,
    state: Mutex<CacheState>,
    metrics: CacheMetrics,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn PersistentStore>>,
    /// Serializes snapshot writes so the last write reflects the latest state
    persist_lock: tokio::sync::Mutex<()>,
    persist_queued: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}

/// Thread-safe adaptive cache for query results.
///
/// Cloning is cheap and yields another handle to the same cache.
#[derive(Clone)]
pub struct QueryCache {
    shared: Arc<Shared>,
}

impl QueryCache {
    /// Create an in-memory cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Create an in-memory cache reading time from `clock`
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Self::assemble(config, None, clock);
        cache.start_sweeper();
        cache
    }

    /// Create a cache backed by `store`, resuming from its last snapshot
    pub async fn open(config: CacheConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self::open_with(config, store, Arc::new(SystemClock)).await
    }

    /// Create a cache backed by `store` reading time from `clock`
    pub async fn open_with(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Self::assemble(config, Some(store), clock);
        cache.load_from_storage().await;
        cache.start_sweeper();
        cache
    }

    fn assemble(
        config: CacheConfig,
        store: Option<Arc<dyn PersistentStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    history: AccessHistory::new(),
                }),
                config,
                metrics: CacheMetrics::new(),
                clock,
                store,
                persist_lock: tokio::sync::Mutex::new(()),
                persist_queued: AtomicBool::new(false),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Check if caching is enabled
    pub fn is_enabled(&self) -> bool {
        self.shared.config.enabled && self.shared.config.max_entries > 0
    }

    fn now(&self) -> u64 {
        self.shared.clock.now_millis()
    }

    /// Store a query result.
    ///
    /// The TTL is `custom_ttl` when given, otherwise the configured default
    /// scaled by how often this key was accessed recently. Fails only when the
    /// value or parameters cannot be serialized.
    pub fn set<T, P>(
        &self,
        query_name: &str,
        value: &T,
        params: &P,
        custom_ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        P: Serialize + ?Sized,
    {
        if !self.is_enabled() {
            return Ok(());
        }
        let key = CacheKey::new(query_name, params)?;
        let value = serde_json::to_value(value)?;
        self.insert(key, Arc::new(value), custom_ttl);
        Ok(())
    }

    fn insert(&self, key: CacheKey, value: Arc<Value>, custom_ttl: Option<Duration>) {
        if !self.is_enabled() {
            return;
        }
        let now = self.now();
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let ttl = custom_ttl.unwrap_or_else(|| {
                state
                    .history
                    .calculate_smart_ttl(&key, self.shared.config.default_ttl, now)
            });

            let at_capacity = state.entries.len() >= self.shared.config.max_entries;
            if at_capacity && !state.entries.contains(&key) {
                self.evict_least_used(state, now);
            }

            state.history.record(&key, now);
            state.entries.put(key, CacheEntry::new(value, now, ttl));
        }
        self.schedule_persist();
    }

    /// Look up a cached result, deserializing it into `T`.
    ///
    /// Returns `None` on a miss, on an expired entry (which is removed), or
    /// when the stored value does not fit `T`.
    pub fn get<T, P>(&self, query_name: &str, params: &P) -> Option<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let value = self.get_value(query_name, params)?;
        match T::deserialize(&*value) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Cached value for '{}' has unexpected shape: {}", query_name, e);
                None
            }
        }
    }

    /// Look up a cached result without deserializing it
    pub fn get_value<P>(&self, query_name: &str, params: &P) -> Option<Arc<Value>>
    where
        P: Serialize + ?Sized,
    {
        if !self.is_enabled() {
            return None;
        }
        match CacheKey::new(query_name, params) {
            Ok(key) => self.lookup(&key),
            Err(e) => {
                warn!("Cannot derive cache key for '{}': {}", query_name, e);
                None
            }
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<Value>> {
        let now = self.now();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let outcome = state.entries.get_mut(key).map(|entry| {
            if entry.is_live(now) {
                entry.hit_count += 1;
                entry.last_accessed_at = now;
                Some(Arc::clone(&entry.value))
            } else {
                None
            }
        });

        match outcome {
            Some(Some(value)) => {
                state.history.record(key, now);
                self.shared.metrics.record_hit();
                Some(value)
            }
            Some(None) => {
                state.entries.pop(key);
                self.shared.metrics.record_expirations(1);
                self.shared.metrics.record_miss();
                None
            }
            None => {
                self.shared.metrics.record_miss();
                None
            }
        }
    }

    /// Check for a live entry without counting it as a read
    pub fn contains<P>(&self, query_name: &str, params: &P) -> bool
    where
        P: Serialize + ?Sized,
    {
        match CacheKey::new(query_name, params) {
            Ok(key) => self.contains_live(&key),
            Err(_) => false,
        }
    }

    fn contains_live(&self, key: &CacheKey) -> bool {
        let now = self.now();
        self.shared
            .state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Remove the entry with the lowest eviction score.
    ///
    /// Ties go to the least recently used entry.
    fn evict_least_used(&self, state: &mut CacheState, now: u64) -> Option<CacheKey> {
        let mut victim: Option<(&CacheKey, f64)> = None;
        for (key, entry) in state.entries.iter().rev() {
            let score = entry.eviction_score(now);
            match victim {
                Some((_, lowest)) if lowest <= score => {}
                _ => victim = Some((key, score)),
            }
        }
        let key = victim.map(|(key, _)| key.clone())?;

        state.entries.pop(&key);
        state.history.remove(&key);
        self.shared.metrics.record_eviction();
        debug!("Evicted cache entry {}", key);
        Some(key)
    }

    /// Remove every expired entry, then evict one more entry if occupancy is
    /// still above the configured ratio. Returns the number of expired entries
    /// removed.
    pub fn sweep(&self) -> usize {
        let now = self.now();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        let pruned = state.history.prune(now);

        let config = &self.shared.config;
        let threshold = config.max_entries as f64 * config.sweep_eviction_ratio;
        if state.entries.len() as f64 > threshold {
            self.evict_least_used(state, now);
        }

        let count = expired.len();
        if count > 0 {
            self.shared.metrics.record_expirations(count as u64);
            debug!("Sweep removed {} expired cache entries", count);
        }
        if pruned > 0 {
            debug!("Sweep dropped access history of {} idle keys", pruned);
        }
        count
    }

    fn start_sweeper(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!("No Tokio runtime; background cache sweep disabled");
            return;
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let mut period = self.shared.config.sweep_interval;
        if period < MIN_SWEEP_INTERVAL {
            warn!(
                "Cache sweep interval {:?} is too short, using {:?}",
                period, MIN_SWEEP_INTERVAL
            );
            period = MIN_SWEEP_INTERVAL;
        }

        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                QueryCache { shared }.sweep();
            }
        });
        *self.shared.sweeper.lock() = Some(task);
    }

    /// Remove every entry whose key matches `pattern`.
    ///
    /// A `&str` or `String` matches as a substring, a `Regex` as an expression.
    pub fn invalidate(&self, pattern: impl Into<InvalidationPattern>) -> usize {
        let pattern = pattern.into();
        let count = self.remove_where(|key| pattern.matches(key.as_str()));
        debug!("Invalidated {} cache entries matching {:?}", count, pattern);
        count
    }

    fn remove_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let count = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let matched: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(key, _)| predicate(key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &matched {
                state.entries.pop(key);
                state.history.remove(key);
            }
            matched.len()
        };
        self.shared.metrics.record_invalidations(count as u64);
        self.schedule_persist();
        count
    }

    /// Run `executor` and cache its result, bypassing any cached value.
    ///
    /// If the executor fails and an entry existed for these parameters, even
    /// an expired one, the old value is returned instead of the error.
    pub async fn refresh<T, P, F, Fut>(&self, query_name: &str, executor: F, params: &P) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = CacheKey::new(query_name, params)?;
        let previous = self
            .shared
            .state
            .lock()
            .entries
            .peek(&key)
            .map(|entry| Arc::clone(&entry.value));

        match executor().await {
            Ok(fresh) => {
                let value = serde_json::to_value(&fresh)?;
                self.insert(key, Arc::new(value), None);
                Ok(fresh)
            }
            Err(err) => match previous.and_then(|value| T::deserialize(&*value).ok()) {
                Some(stale) => {
                    warn!("Cache refresh failed for {}, serving stale value: {}", key, err);
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Warm the cache in the background.
    ///
    /// Does nothing and returns `false` if a live entry already exists.
    /// Otherwise the executor runs after a delay chosen by `priority`; a
    /// successful result is stored and a failure is logged.
    pub fn prefetch<T, P, F, Fut>(
        &self,
        query_name: &str,
        executor: F,
        params: &P,
        priority: PrefetchPriority,
    ) -> bool
    where
        T: Serialize + Send + 'static,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.is_enabled() {
            return false;
        }
        let key = match CacheKey::new(query_name, params) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot derive cache key for prefetch of '{}': {}", query_name, e);
                return false;
            }
        };
        if self.contains_live(&key) {
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("Prefetch of {} skipped: no Tokio runtime", key);
            return false;
        };

        let cache = self.clone();
        let delay = priority.delay();
        handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match executor().await {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(value) => cache.insert(key, Arc::new(value), None),
                    Err(e) => warn!("Prefetch result for {} not serializable: {}", key, e),
                },
                Err(e) => warn!("Prefetch failed for {}: {}", key, e),
            }
        });
        true
    }

    /// Return the cached result, or run `executor`, cache its result and
    /// return it. Failed executions are never cached.
    pub async fn get_or_fetch<T, P, F, Fut>(
        &self,
        query_name: &str,
        params: &P,
        ttl: Option<Duration>,
        executor: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T, P>(query_name, params) {
            return Ok(cached);
        }
        let result = executor().await?;
        if let Err(e) = self.set(query_name, &result, params, ttl) {
            warn!("Could not cache result of '{}': {}", query_name, e);
        }
        Ok(result)
    }

    /// Snapshot of the cache contents and counters
    pub fn get_stats(&self) -> CacheStats {
        let now = self.now();
        let state = self.shared.state.lock();

        let mut live_entries = 0;
        let mut total_hits = 0;
        for (_, entry) in state.entries.iter() {
            if entry.is_live(now) {
                live_entries += 1;
                total_hits += entry.hit_count;
            }
        }
        let table: Vec<(&CacheKey, &CacheEntry)> = state.entries.iter().collect();
        let memory_usage_bytes = serde_json::to_vec(&table).map(|b| b.len()).unwrap_or(0);

        let metrics = &self.shared.metrics;
        CacheStats {
            total_entries: state.entries.len(),
            live_entries,
            hit_rate: CacheStats::entry_hit_rate(total_hits, live_entries),
            memory_usage_bytes,
            access_patterns: state.history.len(),
            hits: metrics.hits(),
            misses: metrics.misses(),
            evictions: metrics.evictions(),
            expirations: metrics.expirations(),
            invalidations: metrics.invalidations(),
        }
    }

    /// Running request counters
    pub fn metrics(&self) -> &CacheMetrics {
        &self.shared.metrics
    }

    /// Drop all entries and history and remove the persisted snapshot
    pub fn clear(&self) {
        {
            let mut state = self.shared.state.lock();
            state.entries.clear();
            state.history.clear();
        }
        if !self.persistence_active() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let cache = self.clone();
        handle.spawn(async move {
            cache.remove_snapshot().await;
        });
    }

    /// Stop the background sweep. The cache stays usable.
    pub fn close(&self) {
        if let Some(task) = self.shared.sweeper.lock().take() {
            task.abort();
            debug!("Cache sweep stopped");
        }
    }

    /// Number of entries, including expired ones not yet removed
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    fn persistence_active(&self) -> bool {
        self.shared.config.persistence_enabled && self.shared.store.is_some()
    }

    fn schedule_persist(&self) {
        if !self.persistence_active() {
            return;
        }
        // A queued write takes its snapshot when it runs, so one is enough.
        if self.shared.persist_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            self.shared.persist_queued.store(false, Ordering::Release);
            return;
        };
        let cache = self.clone();
        handle.spawn(async move {
            cache.persist().await;
        });
    }

    /// Write a snapshot of the live entries to the store now.
    ///
    /// Failures are logged and swallowed.
    pub async fn persist(&self) {
        let Some(store) = self.shared.store.as_ref().filter(|_| self.persistence_active()) else {
            return;
        };
        let _guard = self.shared.persist_lock.lock().await;
        self.shared.persist_queued.store(false, Ordering::Release);

        let snapshot = self.snapshot();
        let raw = match encode_snapshot(&snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode cache snapshot: {}", e);
                return;
            }
        };
        if let Err(e) = store.set_string(&self.shared.config.storage_key, raw).await {
            warn!("Failed to persist cache snapshot: {}", e);
        }
    }

    /// Live entries, most recently used first, up to the persist limit
    fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        let now = self.now();
        let state = self.shared.state.lock();
        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .take(self.shared.config.persist_limit)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    async fn remove_snapshot(&self) {
        let Some(store) = self.shared.store.as_ref() else {
            return;
        };
        let _guard = self.shared.persist_lock.lock().await;
        if let Err(e) = store.remove(&self.shared.config.storage_key).await {
            warn!("Failed to remove cache snapshot: {}", e);
        }
    }

    /// Re-admit snapshot entries that are still live. Returns how many loaded.
    async fn load_from_storage(&self) -> usize {
        let Some(store) = self.shared.store.as_ref().filter(|_| self.persistence_active()) else {
            return 0;
        };
        let raw = match store.get_string(&self.shared.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Failed to read cache snapshot: {}", e);
                return 0;
            }
        };
        let entries = match decode_snapshot(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding unreadable cache snapshot: {}", e);
                return 0;
            }
        };

        let now = self.now();
        let live: Vec<(CacheKey, CacheEntry)> = entries
            .into_iter()
            .filter(|(_, entry)| entry.is_live(now))
            .take(self.shared.config.max_entries)
            .collect();
        let loaded = live.len();

        let mut state = self.shared.state.lock();
        // Snapshots list the most recent entry first; insert oldest first so
        // recency order survives the restart.
        for (key, entry) in live.into_iter().rev() {
            state.entries.put(key, entry);
        }
        info!("Loaded {} cache entries from snapshot", loaded);
        loaded
    }
}

impl CacheInvalidator for QueryCache {
    fn invalidate_query(&self, query_name: &str) -> usize {
        let prefix = CacheKey::prefix_for(query_name);
        self.remove_where(|key| key.as_str().starts_with(&prefix) && key.query_name() == query_name)
    }

    fn invalidate_all(&self) {
        self.clear();
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.shared.config.enabled)
            .field("max_entries", &self.shared.config.max_entries)
            .field("default_ttl", &self.shared.config.default_ttl)
            .field("persistent", &self.persistence_active())
            .field("current_entries", &self.len())
            .finish()
    }
}
