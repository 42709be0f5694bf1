//! Request deduplication, TTL value cache and debounce
//!
//! `RequestCache` combines two maps keyed by request identity:
//! - in-flight requests: concurrent callers with the same key share one
//!   producer future and all receive its result;
//! - completed values: successful results kept until their TTL expires.
//!
//! Failures are shared with every waiter but never stored.
//!
//! Every invalidation bumps a generation counter. A fetch that started
//! under an older generation still answers its own callers but is not
//! stored, and later callers never join it.
//!
//! Expired values are purged on every insert. A cache built with
//! [`RequestCache::with_max_entries`] or [`RequestCache::with_max_weight`]
//! evicts the entries closest to expiry to stay within its limits.
//!
//! `Debouncer` delays an action and drops it if a newer one arrives first.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

type SharedRequest<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

struct InFlight<V, E> {
    id: u64,
    request: SharedRequest<V, E>,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    weight: usize,
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh value served from the TTL cache
    pub hits: u64,
    /// Producer started
    pub misses: u64,
    /// Caller joined an in-flight request
    pub shared: u64,
    /// Values dropped to stay within the size limits
    pub evictions: u64,
}

/// Single-flight request cache with TTL values
pub struct RequestCache<V, E = crate::Error> {
    in_flight: Arc<Mutex<HashMap<String, InFlight<V, E>>>>,
    values: Mutex<HashMap<String, CacheEntry<V>>>,
    generation: AtomicU64,
    next_request_id: AtomicU64,
    max_entries: Option<usize>,
    max_weight: Option<(usize, fn(&V) -> usize)>,
    hits: AtomicU64,
    misses: AtomicU64,
    shared: AtomicU64,
    evictions: AtomicU64,
}

impl<V, E> Default for RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Unbounded cache; expired values are still purged on insert
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            values: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            next_request_id: AtomicU64::new(0),
            max_entries: None,
            max_weight: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shared: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Keep at most `max` values
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Keep the summed `weigher` of stored values at or below `max`
    ///
    /// A single value heavier than `max` is returned to callers but never
    /// stored.
    pub fn with_max_weight(mut self, max: usize, weigher: fn(&V) -> usize) -> Self {
        self.max_weight = Some((max, weigher));
        self
    }

    /// Run `producer` unless a request for `key` is already in flight
    ///
    /// Every caller for the same key receives a clone of the single result.
    /// The in-flight entry is dropped as soon as the producer finishes.
    pub async fn dedupe<F, Fut>(&self, key: &str, producer: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let request = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(key) {
                self.shared.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "Joining in-flight request");
                existing.request.clone()
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                let registry = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let fut = producer();
                let request = async move {
                    let result = fut.await.map_err(Arc::new);
                    let mut registry = registry.lock().await;
                    // An invalidation may have detached this request and a
                    // newer one may own the key now
                    if registry.get(&owned_key).map(|f| f.id) == Some(id) {
                        registry.remove(&owned_key);
                    }
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(
                    key.to_string(),
                    InFlight {
                        id,
                        request: request.clone(),
                    },
                );
                request
            }
        };

        request.await
    }

    /// Fresh cached value for `key`, evicting it if expired
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut values = self.values.lock().await;
        match values.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                values.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` for `ttl`. A zero TTL is never served.
    pub async fn insert(&self, key: &str, value: V, ttl: Duration) {
        let mut values = self.values.lock().await;
        self.store(&mut values, key, value, ttl);
    }

    fn store(&self, values: &mut HashMap<String, CacheEntry<V>>, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        values.retain(|_, entry| now < entry.expires_at);
        values.remove(key);

        let weight = self.max_weight.map(|(_, weigh)| weigh(&value)).unwrap_or(0);
        if let Some((max_weight, _)) = self.max_weight {
            if weight > max_weight {
                tracing::debug!(key, weight, max_weight, "Value too heavy to cache");
                return;
            }
        }

        loop {
            let over_count = self.max_entries.is_some_and(|max| values.len() >= max);
            let over_weight = self.max_weight.is_some_and(|(max, _)| {
                values.values().map(|e| e.weight).sum::<usize>() + weight > max
            });
            if !(over_count || over_weight) {
                break;
            }

            let oldest = values
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest) => {
                    values.remove(&oldest);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                // max_entries of zero
                None => return,
            }
        }

        values.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                weight,
            },
        );
    }

    /// Cached value if fresh, otherwise a deduplicated fetch whose success
    /// is stored for `ttl`
    ///
    /// The result is not stored if the cache was invalidated while the
    /// fetch ran.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let value = self.dedupe(key, producer).await?;

        let mut values = self.values.lock().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            self.store(&mut values, key, value.clone(), ttl);
        } else {
            tracing::debug!(key, "Cache invalidated during fetch, result not stored");
        }
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) {
        self.invalidate_where(|k| k == key).await;
    }

    /// Drop every cached value whose key starts with `prefix`
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.invalidate_where(|k| k.starts_with(prefix)).await;
    }

    pub async fn clear(&self) {
        self.invalidate_where(|_| true).await;
    }

    /// Detach matching in-flight requests, drop matching values and start a
    /// new generation, all under both locks
    async fn invalidate_where(&self, matches: impl Fn(&str) -> bool) {
        let mut in_flight = self.in_flight.lock().await;
        let mut values = self.values.lock().await;
        in_flight.retain(|k, _| !matches(k));
        values.retain(|k, _| !matches(k));
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove expired values; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        let before = values.len();
        values.retain(|_, entry| now < entry.expires_at);
        before - values.len()
    }

    /// Number of stored values, expired ones included until purged
    pub async fn entry_count(&self) -> usize {
        self.values.lock().await.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Runs only the most recent action once `delay` passes without a newer call
pub struct Debouncer {
    delay: Duration,
    pending: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: std::sync::Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action`, cancelling any action still waiting
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drop the waiting action, if any
    pub fn cancel(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = pending {
            handle.abort();
        }
    }

    /// True while an action is scheduled or running
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dedupe_runs_producer_once() {
        let cache: RequestCache<u32, String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..8).map(|_| {
            let calls = Arc::clone(&calls);
            cache.dedupe("story:1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            })
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(7))));
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().shared, 7);
    }

    #[tokio::test]
    async fn test_dedupe_entry_released_after_completion() {
        let cache: RequestCache<u32, String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .dedupe("k", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
            assert!(value < 3);
        }

        // Sequential calls each ran their own producer
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared_and_not_cached() {
        let cache: RequestCache<u32, String> = RequestCache::new();

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", Duration::from_secs(60), || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err("boom".to_string())
            }),
            cache.get_or_fetch("k", Duration::from_secs(60), || async { Ok(1) }),
        );
        assert_eq!(a.unwrap_err().as_str(), "boom");
        assert_eq!(b.unwrap_err().as_str(), "boom");

        // Nothing stored, next fetch runs again
        let value = cache
            .get_or_fetch("k", Duration::from_secs(60), || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache: RequestCache<&'static str, String> = RequestCache::new();
        cache.insert("k", "v", Duration::from_secs(300)).await;

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("k").await, Some("v"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_served() {
        let cache: RequestCache<u8, String> = RequestCache::new();
        cache.insert("k", 1, Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_get_or_fetch_serves_cached_value() {
        let cache: RequestCache<u8, String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let v = cache
                .get_or_fetch("k", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(9)
                })
                .await
                .unwrap();
            assert_eq!(v, 9);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_invalidate_prefix_and_purge() {
        let cache: RequestCache<u8, String> = RequestCache::new();
        cache.insert("perm:a", 1, Duration::from_secs(60)).await;
        cache.insert("perm:b", 2, Duration::from_secs(60)).await;
        cache.insert("img:a", 3, Duration::ZERO).await;

        cache.invalidate_prefix("perm:").await;
        assert_eq!(cache.entry_count().await, 1);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_fetch_discards_stale_result() {
        let cache: Arc<RequestCache<&'static str, String>> = Arc::new(RequestCache::new());
        let ttl = Duration::from_secs(300);

        // Slow load that read the old value before the invalidation
        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("perm:family", ttl, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("old")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate("perm:family").await;

        // A caller arriving after the invalidation starts its own load
        let fresh = cache
            .get_or_fetch("perm:family", ttl, || async { Ok("new") })
            .await
            .unwrap();
        assert_eq!(fresh, "new");

        // The stale load still answers its own caller but is not stored
        assert_eq!(slow.await.unwrap().unwrap(), "old");
        tokio::time::advance(Duration::from_secs(60)).await;
        let value = cache
            .get_or_fetch("perm:family", ttl, || async { Ok("refetched") })
            .await
            .unwrap();
        assert_ne!(value, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_fetch_skips_store() {
        let cache: Arc<RequestCache<u8, String>> = Arc::new(RequestCache::new());
        let ttl = Duration::from_secs(60);

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("img:a", ttl, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear().await;

        assert_eq!(pending.await.unwrap().unwrap(), 1);
        assert_eq!(cache.get("img:a").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_purges_expired_values() {
        let cache: RequestCache<u8, String> = RequestCache::new();
        for i in 0..50 {
            cache.insert(&format!("img:{}", i), 1, Duration::from_secs(600)).await;
        }
        assert_eq!(cache.entry_count().await, 50);

        tokio::time::advance(Duration::from_secs(601)).await;
        cache.insert("img:next", 1, Duration::from_secs(600)).await;
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_evicts_closest_to_expiry() {
        let cache: RequestCache<u8, String> = RequestCache::new().with_max_entries(2);
        cache.insert("a", 1, Duration::from_secs(60)).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("b", 2, Duration::from_secs(60)).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("c", 3, Duration::from_secs(60)).await;

        assert_eq!(cache.entry_count().await, 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(2));
        assert_eq!(cache.get("c").await, Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_max_weight_limits_total_size() {
        let cache: RequestCache<Vec<u8>, String> =
            RequestCache::new().with_max_weight(10, |v: &Vec<u8>| v.len());

        cache.insert("a", vec![0; 4], Duration::from_secs(60)).await;
        cache.insert("b", vec![0; 4], Duration::from_secs(61)).await;
        cache.insert("c", vec![0; 4], Duration::from_secs(62)).await;
        assert_eq!(cache.entry_count().await, 2);
        assert!(cache.get("a").await.is_none());

        // Heavier than the whole budget: served, never stored
        let value = cache
            .get_or_fetch("huge", Duration::from_secs(60), || async { Ok(vec![0; 11]) })
            .await
            .unwrap();
        assert_eq!(value.len(), 11);
        assert!(cache.get("huge").await.is_none());
        assert_eq!(cache.entry_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_runs_last_action_only() {
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            debouncer.call(move || async move {
                seen.lock().unwrap().push(i);
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*seen.lock().unwrap(), vec![4]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_cancel() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);

        debouncer.call(move || async move {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.is_pending());
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
