//! Bounded counter store shared across concurrent event handling
//!
//! Keys accumulate with every repository and runner label combination ever
//! seen, so the map is LRU-bounded. Losing an evicted key resets its history;
//! the next event for that series is treated as a first sighting.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::{Conclusion, MetricKind, Status};

/// Identity of one counter series.
///
/// Every field except `status` and `conclusion` names the series group;
/// `is_main` is part of the group because it is emitted as a series attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub metric: MetricKind,
    pub repo: String,
    pub labels: String,
    pub is_main: bool,
    pub status: Status,
    pub conclusion: Conclusion,
}

impl CounterKey {
    pub fn new(
        metric: MetricKind,
        repo: &str,
        labels: &str,
        is_main: bool,
        status: Status,
        conclusion: Conclusion,
    ) -> Self {
        Self {
            metric,
            repo: repo.to_string(),
            labels: labels.to_string(),
            is_main,
            status,
            conclusion,
        }
    }

    /// Same series group with a different status and conclusion
    pub fn sibling(&self, status: Status, conclusion: Conclusion) -> Self {
        Self {
            status,
            conclusion,
            ..self.clone()
        }
    }
}

/// Result of an atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    pub value: i64,
    /// The key was absent before this increment
    pub first_sighting: bool,
}

/// LRU-bounded, internally synchronized map of counter values.
///
/// No operation can fail; callers never lock.
pub struct CounterCache {
    inner: Mutex<LruCache<CounterKey, i64>>,
}

impl CounterCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Create a cache, treating a zero capacity as one
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    /// Current value, marking the key as recently used
    pub fn get(&self, key: &CounterKey) -> Option<i64> {
        self.inner.lock().get(key).copied()
    }

    pub fn set(&self, key: CounterKey, value: i64) {
        self.inner.lock().put(key, value);
    }

    /// Add one to `key`, starting from zero when it is absent
    pub fn increment(&self, key: CounterKey) -> Increment {
        let mut inner = self.inner.lock();
        let previous = inner.get(&key).copied();
        let value = previous.unwrap_or(0) + 1;
        inner.put(key, value);
        Increment {
            value,
            first_sighting: previous.is_none(),
        }
    }

    /// Value of `key`, storing `value` first if it is absent
    pub fn get_or_insert(&self, key: CounterKey, value: i64) -> i64 {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.get(&key) {
            return *existing;
        }
        inner.put(key, value);
        value
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

impl std::fmt::Debug for CounterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CounterCache")
            .field("len", &inner.len())
            .field("capacity", &inner.cap())
            .finish()
    }
}
