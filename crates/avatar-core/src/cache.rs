//! ============================================================================
//! TTL Cache - Keyed entries with hard expiry and a refresh latch
//! ============================================================================
//! Shared by the backend API client (stale-while-revalidate reads) and the
//! token balance cache. Every instance is explicitly constructed and owned.
//! ============================================================================

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A cached value with its age bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub is_refreshing: bool,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    /// Entries older than their TTL are treated as absent
    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }

    /// Whether the entry has crossed `threshold` (0.0..=1.0) of its TTL
    pub fn is_stale(&self, threshold: f64) -> bool {
        self.age() > self.ttl.mul_f64(threshold)
    }
}

/// Thread-safe keyed TTL cache
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // A poisoned map only means a panic mid-insert; the data is still usable
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store (or replace) an entry, clearing any refresh flag
    pub fn set(&self, key: &str, data: T, ttl: Duration) {
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                ttl,
                is_refreshing: false,
            },
        );
    }

    /// Get a live entry; an expired entry is removed and reported as absent
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<T>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                debug!("Cache entry expired: {}", key);
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Get live data for a key
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Atomically claim the background refresh for a key.
    /// Returns true only if the entry is live, stale past `threshold` and
    /// nobody else is refreshing it.
    pub fn begin_refresh(&self, key: &str, threshold: f64) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() && !entry.is_refreshing && entry.is_stale(threshold) => {
                entry.is_refreshing = true;
                true
            }
            _ => false,
        }
    }

    /// Release the refresh latch without replacing the data
    pub fn end_refresh(&self, key: &str) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.is_refreshing = false;
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop every expired entry, returning how many were evicted
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stale-while-revalidate read.
///
/// A live entry is returned immediately; once it is older than `threshold`
/// of its TTL exactly one background refresh is started. A failed refresh
/// keeps the old entry. A miss fetches inline and caches the result.
pub async fn get_or_revalidate<T, E, F, Fut>(
    cache: &Arc<TtlCache<T>>,
    key: &str,
    ttl: Duration,
    threshold: f64,
    fetch: F,
) -> Result<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Display + Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    if let Some(data) = cache.get(key) {
        if cache.begin_refresh(key, threshold) {
            debug!("Refreshing {} in background", key);
            let cache = Arc::clone(cache);
            let key = key.to_string();
            let refresh = fetch();
            tokio::spawn(async move {
                match refresh.await {
                    Ok(fresh) => cache.set(&key, fresh, ttl),
                    Err(e) => {
                        warn!("Background refresh failed for {}: {}", key, e);
                        cache.end_refresh(&key);
                    }
                }
            });
        }
        return Ok(data);
    }

    let fresh = fetch().await?;
    cache.set(key, fresh.clone(), ttl);
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(100);

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_live_entry() {
        let cache = TtlCache::new();
        cache.set("a", 1u32, TTL);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get("a"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_removed_on_access() {
        let cache = TtlCache::new();
        cache.set("a", 1u32, TTL);
        tokio::time::advance(Duration::from_secs(101)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_latch_only_after_threshold() {
        let cache = TtlCache::new();
        cache.set("a", 1u32, TTL);

        tokio::time::advance(Duration::from_secs(70)).await;
        assert!(!cache.begin_refresh("a", 0.8));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.begin_refresh("a", 0.8));
        // Second caller must not start a duplicate refresh
        assert!(!cache.begin_refresh("a", 0.8));
        assert!(cache.get_entry("a").unwrap().is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_clears_refresh_flag_and_resets_age() {
        let cache = TtlCache::new();
        cache.set("a", 1u32, TTL);
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(cache.begin_refresh("a", 0.8));

        cache.set("a", 2, TTL);
        let entry = cache.get_entry("a").unwrap();
        assert_eq!(entry.data, 2);
        assert!(!entry.is_refreshing);
        assert!(!cache.begin_refresh("a", 0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_refresh_keeps_data() {
        let cache = TtlCache::new();
        cache.set("a", 1u32, TTL);
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(cache.begin_refresh("a", 0.8));

        cache.end_refresh("a");
        assert_eq!(cache.get("a"), Some(1));
        assert!(cache.begin_refresh("a", 0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let cache = TtlCache::new();
        cache.set("old", 1u32, Duration::from_secs(10));
        cache.set("new", 2u32, TTL);
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(2));
    }

    /// Fetcher returning 1, 2, 3... or failing when `fail` is set
    fn counter(calls: &Arc<AtomicU32>, fail: bool) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, String>> + Send>> {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if fail {
                    Err("backend down".to_string())
                } else {
                    Ok(n)
                }
            })
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_miss_fetches_inline() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        let value = get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await;
        assert_eq!(value, Ok(1));
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_fresh_entry_no_refresh() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        let value = get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await;
        settle().await;

        assert_eq!(value, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_stale_entry_serves_old_and_refreshes_once() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await.unwrap();
        tokio::time::advance(Duration::from_secs(85)).await;

        // Two readers in the stale window: both see the cached value,
        // only one refresh starts
        let a = get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await;
        let b = get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await;
        assert_eq!((a, b), (Ok(1), Ok(1)));

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_failure_keeps_old_entry() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, false)).await.unwrap();
        tokio::time::advance(Duration::from_secs(85)).await;

        let value = get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, true)).await;
        assert_eq!(value, Ok(1));
        settle().await;

        let entry = cache.get_entry("k").unwrap();
        assert_eq!(entry.data, 1);
        assert!(!entry.is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_miss_error_not_cached() {
        let cache: Arc<TtlCache<u32>> = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        let value = get_or_revalidate(&cache, "k", TTL, 0.8, counter(&calls, true)).await;
        assert_eq!(value, Err("backend down".to_string()));
        assert!(cache.is_empty());
    }
}
