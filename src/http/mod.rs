//! HTTP execution engine.
//!
//! `HttpEngine::execute` runs one descriptor to completion: every attempt is
//! bounded by the descriptor's timeout, retryable failures back off linearly
//! (`backoff_base * n` before retry `n`), and terminal failures surface
//! immediately. `HttpEngine::fetch` adds the read path in front of it: cache
//! lookup, then the deduplicator, then `execute`.
//!
//! Cancellation is cooperative through a `CancellationToken` checked at every
//! await point. A cancelled request never writes the cache, and neither does
//! a read whose key was invalidated while it was in flight.

pub mod mock;
pub mod request;
pub mod transport;

pub use request::{Method, RequestDescriptor};
pub use transport::{Payload, PreparedRequest, RawResponse, ReqwestTransport, Transport};

use crate::cache::CacheStore;
use crate::dedupe::{Deduplicator, Staleness};
use crate::error::FetchError;
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpEngine {
    transport: Arc<dyn Transport>,
    base_url: String,
    terminal_statuses: Arc<Vec<u16>>,
    cache: CacheStore<Payload>,
    dedupe: Deduplicator<Payload>,
}

impl HttpEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        terminal_statuses: Vec<u16>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            terminal_statuses: Arc::new(terminal_statuses),
            cache: CacheStore::new(),
            dedupe: Deduplicator::new(),
        }
    }

    pub fn cache(&self) -> &CacheStore<Payload> {
        &self.cache
    }

    pub fn dedupe(&self) -> &Deduplicator<Payload> {
        &self.dedupe
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Remove `key` from the cache and detach any read in flight for it, so
    /// the next read goes to the network.
    pub fn invalidate(&self, key: &str) -> bool {
        self.dedupe.forget(key);
        self.cache.invalidate(key)
    }

    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        self.dedupe.forget_matching(pattern);
        self.cache.invalidate_matching(pattern)
    }

    pub fn clear(&self) {
        self.dedupe.forget_all();
        self.cache.clear();
    }

    /// Read path: fresh cache entry if allowed, otherwise a (deduplicated)
    /// network operation.
    pub async fn fetch(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Payload, FetchError> {
        self.fetch_inner(request, cancel, true).await
    }

    /// Like [`HttpEngine::fetch`] but never answers from the cache. The
    /// result is still written back when the descriptor caches.
    pub async fn revalidate(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Payload, FetchError> {
        self.fetch_inner(request, cancel, false).await
    }

    async fn fetch_inner(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
        read_cache: bool,
    ) -> Result<Payload, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Aborted);
        }

        let key = request.key();
        if read_cache && request.caches() {
            if let Some(hit) = self.cache.get(key.as_str()) {
                debug!(key = %key, "cache hit");
                return Ok(hit);
            }
            debug!(key = %key, "cache miss");
        }

        if !request.dedupes() {
            return self.execute(request, cancel).await;
        }

        // The shared operation outlives any single caller: it is only
        // cancelled when every attached caller has dropped it.
        let engine = self.clone();
        let owned = request.clone();
        let shared = self.dedupe.run(&key, move |stale| async move {
            engine.run(&owned, &CancellationToken::new(), Some(&stale)).await
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Aborted),
            result = shared => result,
        }
    }

    /// Run one request with timeout and retry policy, writing the cache on
    /// success when the descriptor asks for it.
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Payload, FetchError> {
        self.run(request, cancel, None).await
    }

    async fn run(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
        stale: Option<&Staleness>,
    ) -> Result<Payload, FetchError> {
        let prepared = self.prepare(request);
        let key = request.key();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Aborted),
                timed = tokio::time::timeout(request.timeout, self.attempt(prepared.clone())) => {
                    timed.unwrap_or(Err(FetchError::Timeout(request.timeout)))
                }
            };

            let err = match outcome {
                Ok(payload) => {
                    if cancel.is_cancelled() {
                        return Err(FetchError::Aborted);
                    }
                    if request.caches() {
                        let fresh = || !stale.is_some_and(Staleness::is_stale);
                        if !self.cache.set_if(key.clone(), payload.clone(), request.cache_ttl, fresh) {
                            debug!(key = %key, "invalidated while in flight, not cached");
                        }
                    }
                    debug!(method = %request.method, key = %key, attempt, "request succeeded");
                    return Ok(payload);
                }
                Err(e) => e,
            };

            if err.is_aborted() {
                debug!(key = %key, attempt, "request aborted");
                return Err(err);
            }
            if !err.is_retryable(&self.terminal_statuses) {
                warn!(method = %request.method, key = %key, attempt, error = %err, "request failed (terminal)");
                return Err(err);
            }
            if attempt > request.max_retries {
                warn!(
                    method = %request.method,
                    key = %key,
                    attempts = attempt,
                    error = %err,
                    "request failed, retries exhausted"
                );
                return Err(err);
            }

            let delay = request.backoff_base * attempt;
            warn!(
                method = %request.method,
                key = %key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, request: PreparedRequest) -> Result<Payload, FetchError> {
        let resp = self.transport.send(request).await?;
        if resp.is_success() {
            return Payload::decode(resp.content_type.as_deref(), &resp.body);
        }

        let body = Payload::decode(resp.content_type.as_deref(), &resp.body)
            .ok()
            .and_then(Payload::into_value);
        Err(FetchError::HttpStatus {
            status: resp.status,
            body,
        })
    }

    fn prepare(&self, request: &RequestDescriptor) -> PreparedRequest {
        let url = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            request.path.clone()
        } else if request.path.starts_with('/') {
            format!("{}{}", self.base_url, request.path)
        } else {
            format!("{}/{}", self.base_url, request.path)
        };

        PreparedRequest {
            method: request.method,
            url,
            query: request.params.query_pairs(),
            headers: request.headers.clone(),
            body: if request.method.is_write() {
                request.body.clone()
            } else {
                None
            },
        }
    }
}
