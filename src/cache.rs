//! Bounded memoization for pure parsing functions
//!
//! Each call site owns its own [`MemoCache`] with its own capacity, TTL and eviction policy.
//! Concurrent callers asking for the same key share a single computation.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry used least recently
    Lru,
    /// Evict the entry with the fewest hits
    Lfu,
    /// Evict the oldest inserted entry
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Maximum number of entries; 0 disables caching
    pub capacity: usize,
    /// Entries older than this are recomputed; `None` keeps them until evicted
    #[serde(rename = "ttl_ms", default, with = "crate::config::duration_ms::option")]
    pub ttl: Option<Duration>,
    pub policy: EvictionPolicy,
}

impl CacheSettings {
    pub fn new(capacity: usize, ttl: Duration, policy: EvictionPolicy) -> Self {
        Self {
            capacity,
            ttl: Some(ttl),
            policy,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    inserted_seq: u64,
    last_used: u64,
    uses: u64,
}

struct Entries<K, V> {
    slots: HashMap<K, Slot<V>>,
    clock: u64,
}

pub struct MemoCache<K, V> {
    name: &'static str,
    settings: CacheSettings,
    entries: Mutex<Entries<K, V>>,
    in_flight: DashMap<K, Arc<OnceCell<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(name: &'static str, settings: CacheSettings) -> Self {
        Self {
            name,
            settings,
            entries: Mutex::new(Entries {
                slots: HashMap::new(),
                clock: 0,
            }),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Returns the cached value for `key`, running `compute` at most once per key in flight.
    ///
    /// Callers that arrive while another caller is computing the same key wait for that
    /// result instead of starting their own.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if self.settings.capacity == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return compute().await;
        }

        if let Some(value) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return value;
        }

        let cell = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let mut computed = false;
        let value = cell
            .get_or_init(|| async {
                // A flight that finished between our lookup and registering may have stored it.
                if let Some(value) = self.lookup(&key) {
                    return value;
                }
                computed = true;
                compute().await
            })
            .await
            .clone();

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.store(key.clone(), value.clone());
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.in_flight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));

        value
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lookup(key)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<K, V>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        entries.clock += 1;
        let now = entries.clock;

        let expired = match entries.slots.get_mut(key) {
            None => return None,
            Some(slot) if self.is_expired(slot) => true,
            Some(slot) => {
                slot.last_used = now;
                slot.uses += 1;
                return Some(slot.value.clone());
            }
        };

        if expired {
            entries.slots.remove(key);
        }
        None
    }

    fn store(&self, key: K, value: V) {
        let mut entries = self.lock();
        entries.clock += 1;
        let now = entries.clock;

        if !entries.slots.contains_key(&key) {
            let before = entries.slots.len();
            entries.slots.retain(|_, slot| !self.is_expired(slot));
            let mut evicted = (before - entries.slots.len()) as u64;

            while entries.slots.len() >= self.settings.capacity {
                match self.victim(&entries.slots) {
                    Some(victim) => {
                        entries.slots.remove(&victim);
                        evicted += 1;
                    }
                    None => break,
                }
            }

            if evicted > 0 {
                self.evictions.fetch_add(evicted, Ordering::Relaxed);
                trace!(cache = self.name, evicted, "Evicted cache entries");
            }
        }

        entries.slots.insert(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
                inserted_seq: now,
                last_used: now,
                uses: 0,
            },
        );
    }

    fn victim(&self, slots: &HashMap<K, Slot<V>>) -> Option<K> {
        let candidate = match self.settings.policy {
            EvictionPolicy::Lru => slots.iter().min_by_key(|(_, slot)| slot.last_used),
            EvictionPolicy::Lfu => slots
                .iter()
                .min_by_key(|(_, slot)| (slot.uses, slot.last_used)),
            EvictionPolicy::Fifo => slots.iter().min_by_key(|(_, slot)| slot.inserted_seq),
        };
        candidate.map(|(key, _)| key.clone())
    }

    fn is_expired(&self, slot: &Slot<V>) -> bool {
        self.settings
            .ttl
            .is_some_and(|ttl| slot.inserted_at.elapsed() >= ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn cache(capacity: usize, policy: EvictionPolicy) -> MemoCache<String, usize> {
        MemoCache::new(
            "test",
            CacheSettings::new(capacity, Duration::from_secs(60), policy),
        )
    }

    async fn fill(cache: &MemoCache<String, usize>, key: &str, value: usize) -> usize {
        cache.get_or_compute(key.to_string(), || async move { value }).await
    }

    #[tokio::test]
    async fn test_cached_value_matches_uncached() {
        let cache = cache(10, EvictionPolicy::Lru);
        let calls = AtomicUsize::new(0);
        let compute = |input: &str| input.len() * 7;

        for _ in 0..3 {
            let value = cache
                .get_or_compute("abcd".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    compute("abcd")
                })
                .await;
            assert_eq!(value, compute("abcd"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(cache(10, EvictionPolicy::Lru));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let cache = cache(2, EvictionPolicy::Lru);
        fill(&cache, "a", 1).await;
        fill(&cache, "b", 2).await;
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        fill(&cache, "c", 3).await;

        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_lfu_evicts_least_frequently_used() {
        let cache = cache(2, EvictionPolicy::Lfu);
        fill(&cache, "a", 1).await;
        fill(&cache, "b", 2).await;
        for _ in 0..3 {
            cache.get(&"b".to_string());
        }
        cache.get(&"a".to_string());
        fill(&cache, "c", 3).await;

        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
    }

    #[tokio::test]
    async fn test_fifo_evicts_oldest_insert() {
        let cache = cache(2, EvictionPolicy::Fifo);
        fill(&cache, "a", 1).await;
        fill(&cache, "b", 2).await;
        cache.get(&"a".to_string());
        fill(&cache, "c", 3).await;

        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_recomputed() {
        let cache = MemoCache::new(
            "ttl",
            CacheSettings::new(10, Duration::from_secs(5), EvictionPolicy::Lru),
        );
        assert_eq!(cache.get_or_compute(1u8, || async { "old" }).await, "old");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get_or_compute(1u8, || async { "new" }).await, "new");
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_caching() {
        let cache = cache(0, EvictionPolicy::Lru);
        assert_eq!(fill(&cache, "a", 1).await, 1);
        assert_eq!(fill(&cache, "a", 2).await, 2);
        assert!(cache.is_empty());
    }
}
