//! Access-pattern tracking and adaptive TTL
//!
//! Each key keeps a short, time-ordered list of access timestamps. The list
//! only tunes how long new writes live; it never affects whether a read hits.

use crate::key::CacheKey;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::time::Duration;

/// Most recent accesses kept per key
pub const MAX_ACCESSES_PER_KEY: usize = 100;
/// Accesses older than this are pruned
pub const HISTORY_WINDOW_MS: u64 = 60 * 60 * 1000;
/// Window used to measure recent access frequency
pub const RECENT_WINDOW_MS: u64 = 60 * 1000;

/// Per-key access timestamps in epoch milliseconds
#[derive(Debug, Default)]
pub struct AccessHistory {
    patterns: AHashMap<CacheKey, VecDeque<u64>>,
}

impl AccessHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an access at `now`, pruning entries outside the history window
    pub fn record(&mut self, key: &CacheKey, now: u64) {
        if !self.patterns.contains_key(key) {
            self.patterns.insert(key.clone(), VecDeque::new());
        }
        let Some(pattern) = self.patterns.get_mut(key) else {
            return;
        };
        pattern.push_back(now);

        while let Some(&oldest) = pattern.front() {
            if now.saturating_sub(oldest) < HISTORY_WINDOW_MS {
                break;
            }
            pattern.pop_front();
        }
        while pattern.len() > MAX_ACCESSES_PER_KEY {
            pattern.pop_front();
        }
    }

    /// Number of recorded accesses for `key`
    pub fn access_count(&self, key: &CacheKey) -> usize {
        self.patterns.get(key).map_or(0, VecDeque::len)
    }

    /// Number of accesses within the last minute
    pub fn recent_count(&self, key: &CacheKey, now: u64) -> usize {
        self.patterns.get(key).map_or(0, |pattern| {
            pattern
                .iter()
                .rev()
                .take_while(|&&t| now.saturating_sub(t) < RECENT_WINDOW_MS)
                .count()
        })
    }

    /// Compute the adaptive TTL for a write to `key`.
    ///
    /// Keys with fewer than two recorded accesses keep the base TTL. Otherwise
    /// the base is scaled by how often the key was touched in the last minute:
    /// more than 10 accesses triples it, more than 5 doubles it, and more than
    /// 2 multiplies it by 1.5.
    pub fn calculate_smart_ttl(&self, key: &CacheKey, base_ttl: Duration, now: u64) -> Duration {
        if self.access_count(key) < 2 {
            return base_ttl;
        }
        let multiplier = ttl_multiplier(self.recent_count(key, now));
        if multiplier == 1.0 {
            return base_ttl;
        }
        Duration::try_from_secs_f64(base_ttl.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
    }

    /// Drop keys whose newest access fell outside the history window.
    /// Returns the number of keys removed.
    pub fn prune(&mut self, now: u64) -> usize {
        let before = self.patterns.len();
        self.patterns.retain(|_, pattern| {
            pattern
                .back()
                .is_some_and(|&newest| now.saturating_sub(newest) < HISTORY_WINDOW_MS)
        });
        before - self.patterns.len()
    }

    /// Forget every access to `key`
    pub fn remove(&mut self, key: &CacheKey) {
        self.patterns.remove(key);
    }

    /// Forget every access to every key
    pub fn clear(&mut self) {
        self.patterns.clear();
    }

    /// Number of keys with tracked history
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if no key has tracked history
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// TTL multiplier for a given recent access count
pub fn ttl_multiplier(recent_count: usize) -> f64 {
    match recent_count {
        c if c > 10 => 3.0,
        c if c > 5 => 2.0,
        c if c > 2 => 1.5,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name, &json!({})).unwrap()
    }

    fn history_with(key: &CacheKey, accesses: usize, now: u64) -> AccessHistory {
        let mut history = AccessHistory::new();
        for i in 0..accesses {
            history.record(key, now - (accesses - 1 - i) as u64);
        }
        history
    }

    #[test]
    fn test_base_ttl_with_little_history() {
        let k = key("courses");
        let base = Duration::from_secs(300);
        let now = 10_000_000;

        let empty = AccessHistory::new();
        assert_eq!(empty.calculate_smart_ttl(&k, base, now), base);

        let single = history_with(&k, 1, now);
        assert_eq!(single.calculate_smart_ttl(&k, base, now), base);
    }

    #[test]
    fn test_multiplier_buckets() {
        let k = key("courses");
        let base = Duration::from_secs(100);
        let now = 10_000_000;

        assert_eq!(history_with(&k, 2, now).calculate_smart_ttl(&k, base, now), base);
        assert_eq!(
            history_with(&k, 3, now).calculate_smart_ttl(&k, base, now),
            Duration::from_secs(150)
        );
        assert_eq!(
            history_with(&k, 6, now).calculate_smart_ttl(&k, base, now),
            Duration::from_secs(200)
        );
        assert_eq!(
            history_with(&k, 11, now).calculate_smart_ttl(&k, base, now),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_ttl_is_monotonic_in_recent_count() {
        let k = key("courses");
        let base = Duration::from_secs(60);
        let now = 10_000_000;

        let mut previous = Duration::ZERO;
        for count in 0..=MAX_ACCESSES_PER_KEY {
            let ttl = history_with(&k, count, now).calculate_smart_ttl(&k, base, now);
            assert!(ttl >= previous, "ttl decreased at count {}", count);
            previous = ttl;
        }
    }

    #[test]
    fn test_old_accesses_do_not_count_as_recent() {
        let k = key("courses");
        let now = 10_000_000;
        let mut history = AccessHistory::new();
        for i in 0..20 {
            history.record(&k, now - RECENT_WINDOW_MS - 1_000 + i);
        }
        history.record(&k, now);

        assert_eq!(history.recent_count(&k, now), 1);
        assert_eq!(
            history.calculate_smart_ttl(&k, Duration::from_secs(10), now),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let k = key("courses");
        let mut history = AccessHistory::new();
        for t in 0..250u64 {
            history.record(&k, 1_000 + t);
        }
        assert_eq!(history.access_count(&k), MAX_ACCESSES_PER_KEY);
    }

    #[test]
    fn test_history_is_pruned_to_window() {
        let k = key("courses");
        let mut history = AccessHistory::new();
        history.record(&k, 1_000);
        history.record(&k, 2_000);
        history.record(&k, 2_000 + HISTORY_WINDOW_MS);

        assert_eq!(history.access_count(&k), 1);
    }

    #[test]
    fn test_huge_base_ttl_saturates() {
        let k = key("courses");
        let now = 10_000_000;

        for count in [3, 6, 11] {
            let history = history_with(&k, count, now);
            assert_eq!(history.calculate_smart_ttl(&k, Duration::MAX, now), Duration::MAX);
        }
        assert_eq!(
            history_with(&k, 11, now).calculate_smart_ttl(&k, Duration::MAX / 2, now),
            Duration::MAX
        );
    }

    #[test]
    fn test_prune_drops_stale_keys_only() {
        let stale = key("stale");
        let fresh = key("fresh");
        let mut history = AccessHistory::new();
        history.record(&stale, 1_000);
        history.record(&fresh, 1_000);
        history.record(&fresh, 1_000 + HISTORY_WINDOW_MS);

        assert_eq!(history.prune(1_000 + HISTORY_WINDOW_MS), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.access_count(&stale), 0);
        assert_eq!(history.access_count(&fresh), 1);

        assert_eq!(history.prune(1_000 + 2 * HISTORY_WINDOW_MS), 1);
        assert!(history.is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let a = key("a");
        let b = key("b");
        let mut history = AccessHistory::new();
        history.record(&a, 1);
        history.record(&b, 1);
        assert_eq!(history.len(), 2);

        history.remove(&a);
        assert_eq!(history.len(), 1);
        assert_eq!(history.access_count(&a), 0);

        history.clear();
        assert!(history.is_empty());
    }
}
