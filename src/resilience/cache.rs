//! Bounded memoization for deterministic transform steps
//!
//! Only pure computations belong here. Query and publish results are never
//! cached.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Least-recently-used cache shared behind `&self`.
///
/// A capacity of zero disables caching: every lookup computes.
///
/// # Example
/// ```
/// use tabsync::resilience::ResultCache;
///
/// let cache = ResultCache::new(2);
/// assert_eq!(cache.get_or_insert_with("a".to_string(), || 1), 1);
/// assert_eq!(cache.get_or_insert_with("a".to_string(), || 2), 1);
/// assert_eq!(cache.hits(), 1);
/// ```
pub struct ResultCache<K, V> {
    capacity: usize,
    state: Mutex<LruState<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct LruState<K, V> {
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> LruState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn touch(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        let (_, stamp) = self.entries.get_mut(key)?;
        let previous = std::mem::replace(stamp, tick);
        self.recency.remove(&previous);
        self.recency.insert(tick, key.clone());
        self.entries.get(key).map(|(value, _)| value)
    }

    fn insert(&mut self, key: K, value: V, capacity: usize) {
        self.tick += 1;
        if let Some((_, stamp)) = self.entries.insert(key.clone(), (value, self.tick)) {
            self.recency.remove(&stamp);
        }
        self.recency.insert(self.tick, key);

        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs outside the lock, so two threads missing the same key
    /// may both compute it.
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if self.capacity == 0 {
            return compute();
        }

        if let Some(value) = self.lock().touch(&key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return value;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute();
        self.lock().insert(key, value.clone(), self.capacity);
        value
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop all entries and reset the counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState<K, V>> {
        // A panic inside `compute` never happens under the lock, so the
        // state is consistent even if the mutex was poisoned.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
