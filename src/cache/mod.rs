// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed key→value store with per-entry TTL.
//!
//! One instance lives for the whole pipeline, one per module execution and
//! one per task; the scopes never reference each other. Values are stored as
//! `Arc<dyn Any>` and recovered through typed accessors. Expired entries are
//! dropped lazily on read.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A concurrency-safe typed cache.
#[derive(Default)]
pub struct Cache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Cache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value without expiry.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, None);
    }

    /// Store a value with an optional TTL.
    pub fn set_with_ttl<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        ttl: Option<Duration>,
    ) {
        let entry = Entry {
            value: Arc::new(value),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.into(), entry);
    }

    /// Fetch a value by key and type. Returns `None` on a missing key, an
    /// expired entry (which is dropped), or a type mismatch.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
            return None;
        }
        entries
            .get(key)
            .and_then(|e| Arc::clone(&e.value).downcast::<T>().ok())
    }

    /// Remove one entry.
    pub fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(key);
    }

    /// Drop every entry.
    pub fn release(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    /// Number of live (possibly expired, not yet collected) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_typed() {
        let cache = Cache::new();
        cache.set("count", 42u64);
        cache.set("name", "etcd".to_string());

        assert_eq!(*cache.get::<u64>("count").unwrap(), 42);
        assert_eq!(*cache.get::<String>("name").unwrap(), "etcd");
    }

    #[test]
    fn test_type_mismatch_returns_none() {
        let cache = Cache::new();
        cache.set("count", 42u64);
        assert!(cache.get::<String>("count").is_none());
    }

    #[test]
    fn test_missing_key() {
        let cache = Cache::new();
        assert!(cache.get::<u64>("nope").is_none());
    }

    #[test]
    fn test_expired_entry_dropped_on_read() {
        let cache = Cache::new();
        cache.set_with_ttl("ephemeral", 1u8, Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get::<u8>("ephemeral").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_unexpired_entry_survives() {
        let cache = Cache::new();
        cache.set_with_ttl("live", 7u8, Some(Duration::from_secs(60)));
        assert_eq!(*cache.get::<u8>("live").unwrap(), 7);
    }

    #[test]
    fn test_release_clears() {
        let cache = Cache::new();
        cache.set("a", 1u8);
        cache.set("b", 2u8);
        cache.release();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let cache = Cache::new();
        cache.set("k", 1u8);
        cache.set("k", 2u8);
        assert_eq!(*cache.get::<u8>("k").unwrap(), 2);
    }
}
