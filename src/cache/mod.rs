//! In-memory response cache shared by every binding in the process.
//!
//! Entries carry an optional expiry and are evicted lazily: an expired entry
//! is dropped by the read that finds it, never by a background sweep.
//! Subscribers registered against a key hear about every write to it and
//! every invalidation that covers it.

pub mod key;

pub use key::{CacheKey, Params};

use dashmap::DashMap;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// A cached value with its insertion time and optional expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        let inserted_at = Instant::now();
        Self {
            value,
            inserted_at,
            expires_at: ttl.map(|t| inserted_at + t),
        }
    }

    /// Valid iff there is no expiry or `now` is strictly before it.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// What happened to a subscribed key.
#[derive(Debug)]
pub enum CacheEvent<'a, V> {
    /// The key was written with this value.
    Updated(&'a V),
    /// The key was invalidated (point, pattern or full clear).
    Removed,
}

type Callback<V> = Arc<dyn Fn(CacheEvent<'_, V>) + Send + Sync>;

struct Inner<V> {
    entries: DashMap<CacheKey, CacheEntry<V>>,
    /// key → (subscriber id, callback)
    subscribers: DashMap<CacheKey, Vec<(u64, Callback<V>)>>,
    next_subscriber: AtomicU64,
}

/// Thread-safe cache store. Clones share the same underlying maps.
pub struct CacheStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                subscribers: DashMap::new(),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Return the value for `key` unless it is missing or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.inner.entries.get(key) {
            None => return None,
            Some(entry) if entry.is_valid_at(now) => return Some(entry.value.clone()),
            Some(_) => true,
        };

        if expired {
            self.inner.entries.remove_if(key, |_, e| !e.is_valid_at(now));
            debug!(key, "evicted expired cache entry");
        }
        None
    }

    /// Overwrite the entry for `key` and notify its subscribers synchronously.
    pub fn set(&self, key: impl Into<CacheKey>, value: V, ttl: Option<Duration>) {
        self.set_if(key, value, ttl, || true);
    }

    /// Like [`CacheStore::set`], but only writes when `keep()` is true.
    /// `keep` runs with the key's shard locked, so an invalidation that
    /// flags the writer before removing the key cannot be overtaken by it.
    pub fn set_if<F>(&self, key: impl Into<CacheKey>, value: V, ttl: Option<Duration>, keep: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let key = key.into();
        {
            let slot = self.inner.entries.entry(key.clone());
            if !keep() {
                return false;
            }
            slot.insert(CacheEntry::new(value.clone(), ttl));
        }

        for cb in self.callbacks_for(key.as_str()) {
            cb(CacheEvent::Updated(&value));
        }
        true
    }

    /// Remove one key. Subscribers of the key are told even if nothing was
    /// stored. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.entries.remove(key).is_some();
        debug!(key, removed, "cache invalidate");

        for cb in self.callbacks_for(key) {
            cb(CacheEvent::Removed);
        }
        removed
    }

    /// Remove every key matching `pattern`. Returns the number removed.
    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        let mut removed = 0usize;
        self.inner.entries.retain(|k, _| {
            if pattern.is_match(k.as_str()) {
                removed += 1;
                false
            } else {
                true
            }
        });
        debug!(pattern = %pattern, removed, "cache invalidate_matching");

        let callbacks: Vec<Callback<V>> = self
            .inner
            .subscribers
            .iter()
            .filter(|e| pattern.is_match(e.key().as_str()))
            .flat_map(|e| e.value().iter().map(|(_, cb)| cb.clone()).collect::<Vec<_>>())
            .collect();
        for cb in callbacks {
            cb(CacheEvent::Removed);
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&self) {
        let removed = self.inner.entries.len();
        self.inner.entries.clear();
        debug!(removed, "cache cleared");

        let callbacks: Vec<Callback<V>> = self
            .inner
            .subscribers
            .iter()
            .flat_map(|e| e.value().iter().map(|(_, cb)| cb.clone()).collect::<Vec<_>>())
            .collect();
        for cb in callbacks {
            cb(CacheEvent::Removed);
        }
    }

    /// Register `callback` for events on `key`. The registration lasts until
    /// the returned handle is unsubscribed or dropped.
    pub fn subscribe<F>(&self, key: impl Into<CacheKey>, callback: F) -> CacheSubscription<V>
    where
        F: Fn(CacheEvent<'_, V>) + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        CacheSubscription {
            key,
            id,
            store: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.subscribers.get(key).map_or(0, |s| s.len())
    }

    /// Number of stored entries, expired ones included until read.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Clone the callbacks out so none run while a map shard is locked.
    fn callbacks_for(&self, key: &str) -> Vec<Callback<V>> {
        self.inner
            .subscribers
            .get(key)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }
}

/// Handle for one cache subscription. Released exactly once, by
/// [`CacheSubscription::unsubscribe`] or on drop.
pub struct CacheSubscription<V> {
    key: CacheKey,
    id: u64,
    store: Weak<Inner<V>>,
    active: bool,
}

impl<V> CacheSubscription<V> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let Some(inner) = self.store.upgrade() else {
            return;
        };
        if let Some(mut subs) = inner.subscribers.get_mut(&self.key) {
            subs.retain(|(id, _)| *id != self.id);
        }
        inner.subscribers.remove_if(&self.key, |_, subs| subs.is_empty());
    }
}

impl<V> Drop for CacheSubscription<V> {
    fn drop(&mut self) {
        self.release();
    }
}
