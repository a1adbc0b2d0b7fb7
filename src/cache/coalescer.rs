//! TTL cache with in-flight request coalescing.
//!
//! ```text
//! get_or_fetch(k) ─┬─ fresh entry?  ─────────────▶ cached value
//!                  ├─ fetch in flight? ──────────▶ await the same future
//!                  └─ otherwise ─ start fetch ──▶ cache on success, forget on failure
//! ```

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::remote::RemoteError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, RemoteError>>>;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub written_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) < self.ttl
    }
}

/// A registered fetch. Invalidation unregisters it, so a result is only
/// cached by the flight that is still registered under its key when it
/// finishes. Ids are never reused.
struct Flight<V> {
    id: u64,
    ttl: Duration,
    future: SharedFetch<V>,
}

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, Flight<V>>,
    next_flight: u64,
}

pub struct Coalescer<K, V> {
    name: &'static str,
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                next_flight: 0,
            })),
        }
    }

    /// Fresh cached value without fetching.
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Return the cached value for `key`, join a fetch already in flight, or
    /// start one with `fetch`. Failures are never cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, ttl: Duration, fetch: F) -> Result<V, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, RemoteError>> + Send + 'static,
    {
        let (flight_id, future) = {
            let mut inner = self.inner.lock();

            if let Some(entry) = inner.entries.get(&key) {
                if entry.is_fresh(Instant::now()) {
                    return Ok(entry.value.clone());
                }
                inner.entries.remove(&key);
            }

            if let Some(flight) = inner.in_flight.get(&key) {
                log::debug!("[{}] joining in-flight fetch for {:?}", self.name, key);
                (flight.id, flight.future.clone())
            } else {
                let id = inner.next_flight;
                inner.next_flight += 1;
                let future = fetch().boxed().shared();
                inner.in_flight.insert(
                    key.clone(),
                    Flight {
                        id,
                        ttl,
                        future: future.clone(),
                    },
                );
                (id, future)
            }
        };

        let result = future.await;
        self.complete(&key, flight_id, &result);
        result
    }

    /// Settle a finished flight. Every waiter calls this; only the first one
    /// to see its flight still registered does the bookkeeping.
    fn complete(&self, key: &K, flight_id: u64, result: &Result<V, RemoteError>) {
        let mut inner = self.inner.lock();
        let owned = inner
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.id == flight_id);
        let flight = if owned { inner.in_flight.remove(key) } else { None };

        match (result, flight) {
            (Ok(value), Some(flight)) => {
                inner.entries.insert(
                    key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        written_at: Instant::now(),
                        ttl: flight.ttl,
                    },
                );
            }
            // Settled by an earlier waiter, or invalidated mid-flight
            (_, None) => {}
            (Err(e), Some(_)) => {
                log::debug!("[{}] fetch for {:?} failed, not caching: {}", self.name, key, e);
            }
        }
    }

    /// Drop the entry for `key`. A fetch already in flight for it still
    /// resolves for its waiters but will not be cached.
    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.entries.remove(key);
        if inner.in_flight.remove(key).is_some() {
            log::debug!("[{}] in-flight fetch for {:?} will not be cached", self.name, key);
        }
    }

    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        let keys: Vec<K> = {
            let inner = self.inner.lock();
            inner
                .entries
                .keys()
                .chain(inner.in_flight.keys())
                .filter(|k| predicate(k))
                .cloned()
                .collect()
        };
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Forget everything, including results of fetches still in flight.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.in_flight.clear();
        log::debug!("[{}] cache reset", self.name);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Keys with an entry or a fetch in flight.
    pub fn tracked_keys(&self) -> usize {
        let inner = self.inner.lock();
        inner.entries.len() + inner.in_flight.keys().filter(|k| !inner.entries.contains_key(*k)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, RemoteError>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache: Coalescer<String, u32> = Coalescer::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let calls_a = calls.clone();
        let first = cache.get_or_fetch("k".to_string(), Duration::from_secs(30), move || {
            calls_a.fetch_add(1, Ordering::SeqCst);
            async move { rx.await.map_err(|e| RemoteError::Network(e.to_string())) }
        });
        let second = cache.get_or_fetch(
            "k".to_string(),
            Duration::from_secs(30),
            counting_fetch(&calls, 99),
        );
        let release = async move {
            tokio::task::yield_now().await;
            tx.send(7).unwrap();
        };

        let (a, b, _) = tokio::join!(first, second, release);
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_count(), 0);
        assert_eq!(cache.get(&"k".to_string()), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache: Coalescer<&'static str, u32> = Coalescer::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        assert_eq!(cache.get_or_fetch("k", ttl, counting_fetch(&calls, 1)).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get_or_fetch("k", ttl, counting_fetch(&calls, 2)).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_or_fetch("k", ttl, counting_fetch(&calls, 3)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache: Coalescer<&'static str, u32> = Coalescer::new("test");
        let ttl = Duration::from_secs(30);

        let failed = cache
            .get_or_fetch("k", ttl, || async { Err(RemoteError::Network("down".to_string())) })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.in_flight_count(), 0);

        let retried = cache.get_or_fetch("k", ttl, || async { Ok(5) }).await;
        assert_eq!(retried.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_invalidate_during_flight_discards_late_result() {
        let cache: Coalescer<&'static str, u32> = Coalescer::new("test");
        let ttl = Duration::from_secs(30);
        let (tx, rx) = oneshot::channel::<u32>();

        let pending = cache.get_or_fetch("k", ttl, move || async move {
            rx.await.map_err(|e| RemoteError::Network(e.to_string()))
        });
        let invalidate = async {
            tokio::task::yield_now().await;
            cache.invalidate(&"k");
            tx.send(1).unwrap();
        };
        let (late, _) = tokio::join!(pending, invalidate);

        // The waiter still gets its answer, but the cache does not keep it.
        assert_eq!(late.unwrap(), 1);
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_invalidation_leaves_no_bookkeeping() {
        let cache: Coalescer<u32, u32> = Coalescer::new("test");
        let ttl = Duration::from_secs(30);

        for key in 0..1000 {
            cache.invalidate(&key);
        }
        assert_eq!(cache.tracked_keys(), 0);

        cache.get_or_fetch(7, ttl, || async { Ok(1) }).await.unwrap();
        cache.invalidate(&7);
        assert_eq!(cache.tracked_keys(), 0);

        // A fetch started after invalidation is cached as usual
        assert_eq!(cache.get_or_fetch(7, ttl, || async { Ok(2) }).await.unwrap(), 2);
        assert_eq!(cache.get(&7), Some(2));
    }

    #[tokio::test]
    async fn test_reset_and_invalidate_where() {
        let cache: Coalescer<String, u32> = Coalescer::new("test");
        let ttl = Duration::from_secs(30);
        for key in ["a:1", "a:2", "b:1"] {
            cache.get_or_fetch(key.to_string(), ttl, || async { Ok(0) }).await.unwrap();
        }
        assert_eq!(cache.len(), 3);

        cache.invalidate_where(|k| k.starts_with("a:"));
        assert_eq!(cache.len(), 1);

        cache.reset();
        assert!(cache.is_empty());
    }
}
