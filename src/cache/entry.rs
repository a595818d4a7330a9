use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Invoked exactly once when an entry is evicted, whether by `delete`,
/// `delete_prefix`, `clear`, replacement in `set`, or TTL expiry in `flush`.
pub type OnDelete<V> = Arc<dyn Fn(&V) + Send + Sync>;

#[derive(Default)]
pub struct CacheOptions<V> {
    /// `None` means the entry never expires on its own; only an explicit
    /// delete or replacement removes it. `Some(Duration::ZERO)` marks it for
    /// eviction on the next `flush`.
    pub ttl: Option<Duration>,
    pub size: u64,
    pub on_delete: Option<OnDelete<V>>,
}

struct CacheEntry<V> {
    value: V,
    ttl: Option<Duration>,
    size: u64,
    last_touched: Instant,
    on_delete: Option<OnDelete<V>>,
}

/// Generic TTL-based content cache, shaped like the teacher's
/// `TileManager`'s `RwLock<HashMap<..>>` rather than a fixed-capacity LRU:
/// TTL lives per-entry, which a global-TTL cache like `moka` cannot express,
/// so this is hand-rolled instead of pulling that dependency in.
pub struct Cache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    enabled: AtomicBool,
}

impl<V: Clone> Default for Cache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Cache<V> {
    pub fn new() -> Self {
        Cache {
            entries: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// While disabled, `get` reports every key absent and `set` stops short
    /// of storing anything; entries already present are left untouched and
    /// become visible again once re-enabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled() {
            return None;
        }
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(key)?;
        entry.last_touched = Instant::now();
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`. Returns `value` regardless of whether the
    /// cache is enabled, matching callers that use the return value as their
    /// own owned copy rather than round-tripping through `get`.
    pub fn set(&self, key: impl Into<String>, value: V, opts: CacheOptions<V>) -> V {
        if self.enabled() {
            let key = key.into();
            let entry = CacheEntry {
                value: value.clone(),
                ttl: opts.ttl,
                size: opts.size,
                last_touched: Instant::now(),
                on_delete: opts.on_delete,
            };
            let previous = self.entries.write().unwrap().insert(key, entry);
            if let Some(previous) = previous {
                run_on_delete(&previous);
            }
        }
        value
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().unwrap().remove(key);
        let existed = removed.is_some();
        if let Some(entry) = removed {
            run_on_delete(&entry);
        }
        existed
    }

    /// Removes every key with the given prefix, e.g. all entries scoped to a
    /// tileset URI that is being torn down.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let removed: Vec<CacheEntry<V>> = {
            let mut entries = self.entries.write().unwrap();
            let keys: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k))
                .collect()
        };
        let count = removed.len();
        for entry in &removed {
            run_on_delete(entry);
        }
        count
    }

    pub fn clear(&self) {
        let removed: Vec<CacheEntry<V>> = self.entries.write().unwrap().drain().map(|(_, v)| v).collect();
        for entry in &removed {
            run_on_delete(entry);
        }
    }

    /// Evicts every entry whose TTL has elapsed since it was last touched by
    /// `get` or `set`. Intended to be driven once per frame by the main loop.
    pub fn flush(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CacheEntry<V>> = {
            let mut entries = self.entries.write().unwrap();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| match entry.ttl {
                    Some(ttl) => now.duration_since(entry.last_touched) >= ttl,
                    None => false,
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k))
                .collect()
        };
        let count = expired.len();
        for entry in &expired {
            run_on_delete(entry);
        }
        count
    }

    pub fn total_size(&self) -> u64 {
        self.entries.read().unwrap().values().map(|e| e.size).sum()
    }
}

fn run_on_delete<V>(entry: &CacheEntry<V>) {
    if let Some(cb) = &entry.on_delete {
        // An entry's disposal callback must not be able to take down the
        // cache or a sibling eviction; isolate each invocation.
        let _ = catch_unwind(AssertUnwindSafe(|| cb(&entry.value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn set_then_get_round_trips() {
        let cache: Cache<i32> = Cache::new();
        cache.set("a", 1, CacheOptions::default());
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn on_delete_fires_exactly_once_on_replace() {
        let cache: Cache<i32> = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        cache.set(
            "a",
            1,
            CacheOptions {
                on_delete: Some(Arc::new(move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );
        cache.set("a", 2, CacheOptions::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cache.delete("a");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second entry had no callback");
    }

    #[test]
    fn disabled_cache_hides_existing_and_refuses_new_entries() {
        let cache: Cache<i32> = Cache::new();
        cache.set("a", 1, CacheOptions::default());
        cache.set_enabled(false);
        assert_eq!(cache.get("a"), None);
        let returned = cache.set("b", 2, CacheOptions::default());
        assert_eq!(returned, 2);
        assert_eq!(cache.get("b"), None);
        cache.set_enabled(true);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None, "set while disabled must not store");
    }

    #[test]
    fn flush_evicts_only_expired_entries() {
        let cache: Cache<i32> = Cache::new();
        cache.set(
            "expires",
            1,
            CacheOptions {
                ttl: Some(Duration::from_nanos(1)),
                ..Default::default()
            },
        );
        cache.set(
            "forever",
            2,
            CacheOptions {
                ttl: None,
                ..Default::default()
            },
        );
        std::thread::sleep(Duration::from_millis(2));
        let evicted = cache.flush();
        assert_eq!(evicted, 1);
        assert_eq!(cache.get("expires"), None);
        assert_eq!(cache.get("forever"), Some(2));
    }

    #[test]
    fn delete_prefix_removes_matching_keys_only() {
        let cache: Cache<i32> = Cache::new();
        cache.set("tileset/a", 1, CacheOptions::default());
        cache.set("tileset/b", 2, CacheOptions::default());
        cache.set("other", 3, CacheOptions::default());
        let removed = cache.delete_prefix("tileset/");
        assert_eq!(removed, 2);
        assert_eq!(cache.get("other"), Some(3));
    }

    #[test]
    fn panicking_on_delete_does_not_block_other_evictions() {
        let cache: Cache<i32> = Cache::new();
        cache.set(
            "a",
            1,
            CacheOptions {
                on_delete: Some(Arc::new(|_| panic!("boom"))),
                ..Default::default()
            },
        );
        cache.set("b", 2, CacheOptions::default());
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }
}
