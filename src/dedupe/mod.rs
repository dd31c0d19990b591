//! In-flight request deduplication.
//!
//! At most one operation runs per cache key. Callers arriving while it is
//! pending get a clone of the same shared future and therefore the same
//! value or error. The map only keeps a weak handle: once every caller has
//! given up on an operation it is dropped (which cancels it) and the next
//! caller starts a fresh one.
//!
//! Invalidating a key detaches its pending operation with [`Deduplicator::forget`]:
//! callers already attached still get its result, later callers start a new
//! one, and the detached operation is flagged [`Staleness`] so it does not
//! write the cache.

use crate::cache::CacheKey;
use crate::error::FetchError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use regex::Regex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type OpFuture<V> = BoxFuture<'static, Result<V, FetchError>>;

/// Future handed to every caller attached to one pending operation.
pub type SharedOp<V> = Shared<OpFuture<V>>;

/// Set once an in-flight operation's key has been invalidated.
#[derive(Debug, Clone, Default)]
pub struct Staleness(Arc<AtomicBool>);

impl Staleness {
    pub fn is_stale(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct Pending<V> {
    id: u64,
    op: WeakShared<OpFuture<V>>,
    stale: Staleness,
}

pub struct Deduplicator<V> {
    pending: Arc<DashMap<CacheKey, Pending<V>>>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for Deduplicator<V> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<V> Default for Deduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Deduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach to the pending operation for `key`, or start one with `make_op`.
    /// `make_op` is only invoked when no live operation exists, and receives
    /// the flag that [`Deduplicator::forget`] raises on it.
    pub fn run<F, Fut>(&self, key: &CacheKey, make_op: F) -> SharedOp<V>
    where
        F: FnOnce(Staleness) -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = slot.get().op.upgrade() {
                    debug!(key = %key, "attached to in-flight request");
                    return existing;
                }
                // Every caller of the previous operation walked away.
                let (pending, shared) = self.start(key, make_op);
                match pending {
                    Some(p) => {
                        slot.insert(p);
                    }
                    None => {
                        slot.remove();
                    }
                }
                shared
            }
            Entry::Vacant(slot) => {
                let (pending, shared) = self.start(key, make_op);
                if let Some(p) = pending {
                    slot.insert(p);
                }
                shared
            }
        }
    }

    /// Number of operations currently pending.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Detach the pending operation for `key`. Returns whether one existed.
    pub fn forget(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                pending.stale.mark();
                debug!(key, "detached in-flight request");
                true
            }
            None => false,
        }
    }

    /// Detach every pending operation whose key matches `pattern`.
    pub fn forget_matching(&self, pattern: &Regex) -> usize {
        self.forget_where(|key| pattern.is_match(key))
    }

    pub fn forget_all(&self) -> usize {
        self.forget_where(|_| true)
    }

    fn forget_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut detached = 0usize;
        self.pending.retain(|key, pending| {
            if matches(key.as_str()) {
                pending.stale.mark();
                detached += 1;
                false
            } else {
                true
            }
        });
        if detached > 0 {
            debug!(detached, "detached in-flight requests");
        }
        detached
    }

    fn start<F, Fut>(&self, key: &CacheKey, make_op: F) -> (Option<Pending<V>>, SharedOp<V>)
    where
        F: FnOnce(Staleness) -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard {
            pending: self.pending.clone(),
            key: key.clone(),
            id,
        };
        let stale = Staleness::default();
        let fut = make_op(stale.clone());
        let op: OpFuture<V> = async move {
            let _guard = guard;
            fut.await
        }
        .boxed();

        let shared = op.shared();
        // `downgrade` only fails once the future has completed, which an
        // unpolled one cannot have.
        let pending = shared.downgrade().map(|op| Pending { id, op, stale });
        (pending, shared)
    }
}

/// Removes the pending entry when its operation settles or is dropped.
struct PendingGuard<V> {
    pending: Arc<DashMap<CacheKey, Pending<V>>>,
    key: CacheKey,
    id: u64,
}

impl<V> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        let id = self.id;
        self.pending.remove_if(self.key.as_str(), |_, p| p.id == id);
    }
}
