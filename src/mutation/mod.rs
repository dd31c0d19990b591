//! Write operations (POST, PUT, PATCH, DELETE) and the cache keys they make
//! stale.
//!
//! A `MutationExecutor` never reads or writes the cache for the operation
//! itself and never deduplicates: two back-to-back writes are two requests.
//! Once the server accepts a write, every declared [`Invalidation`] is
//! applied, before the response body is decoded and before state moves to
//! `Success`. A write the server rejected invalidates nothing.
//!
//! State reflects the most recently issued call. A slower, older call that
//! settles afterwards does not overwrite it.
//!
//! ```rust,ignore
//! let place = MutationExecutor::<Order>::new(client.clone())
//!     .invalidates(Invalidation::key("/positions"))
//!     .invalidates(Invalidation::prefix("/markets/42")?);
//!
//! let order = place.mutate(RequestDescriptor::post("/orders").json(&new_order)?).await?;
//! ```

use crate::cache::CacheKey;
use crate::client::QueryClient;
use crate::error::FetchError;
use crate::http::RequestDescriptor;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A cache key or key pattern made stale by a successful write.
#[derive(Debug, Clone)]
pub enum Invalidation {
    Key(CacheKey),
    Pattern(Regex),
}

impl Invalidation {
    pub fn key(key: impl Into<CacheKey>) -> Self {
        Invalidation::Key(key.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Invalidation::Pattern)
    }

    /// Every key for `path`, with or without params, and everything below it.
    pub fn prefix(path: &str) -> Result<Self, regex::Error> {
        Self::pattern(&format!("^{}", regex::escape(path)))
    }

    fn apply(&self, client: &QueryClient) -> usize {
        match self {
            Invalidation::Key(key) => usize::from(client.invalidate(key.as_str())),
            Invalidation::Pattern(re) => client.invalidate_matching(re),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    Idle,
    Pending,
    Success(T),
    Error(FetchError),
}

impl<T> MutationState<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MutationState::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MutationState::Error(_))
    }
}

pub struct MutationExecutor<T> {
    client: QueryClient,
    invalidates: Vec<Invalidation>,
    state: watch::Sender<MutationState<T>>,
    /// Sequence number of the latest issued call.
    issued: AtomicU64,
}

impl<T> MutationExecutor<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(client: QueryClient) -> Self {
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            client,
            invalidates: Vec::new(),
            state,
            issued: AtomicU64::new(0),
        }
    }

    /// Declare a key or pattern to invalidate after each successful write.
    pub fn invalidates(mut self, target: Invalidation) -> Self {
        self.invalidates.push(target);
        self
    }

    pub async fn mutate(&self, request: RequestDescriptor) -> Result<T, FetchError> {
        self.mutate_with(request, &CancellationToken::new()).await
    }

    /// Run one write. Concurrent calls are independent requests; state
    /// follows the latest one issued.
    pub async fn mutate_with(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let request = request.use_cache(false).dedupe(false);
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(MutationState::Pending);

        let result = match self.client.engine().execute(&request, cancel).await {
            Ok(payload) => {
                // The server state changed whatever the body decodes to.
                let removed: usize = self.invalidates.iter().map(|inv| inv.apply(&self.client)).sum();
                info!(
                    method = %request.method,
                    path = %request.path,
                    invalidated = removed,
                    "mutation accepted"
                );
                payload.parse::<T>()
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(method = %request.method, path = %request.path, error = %e, "mutation failed");
        }

        let applied = self.state.send_if_modified(|state| {
            if self.issued.load(Ordering::SeqCst) != seq {
                return false;
            }
            *state = match &result {
                Ok(value) => MutationState::Success(value.clone()),
                Err(e) => MutationState::Error(e.clone()),
            };
            true
        });
        if !applied {
            debug!(path = %request.path, seq, "newer mutation issued, outcome not published");
        }
        result
    }

    pub fn state(&self) -> MutationState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    /// Back to `Idle`. Calls still in flight no longer publish their outcome.
    pub fn reset(&self) {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(MutationState::Idle);
    }
}
