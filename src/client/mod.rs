//! The shared entry point handed to every binding.
//!
//! A `QueryClient` owns the execution engine (and through it the cache and
//! deduplicator) plus the focus signal the host uses to announce that the
//! application came back to the foreground. Construct one and clone it into
//! every binding; clones share all state.

use crate::cache::CacheStore;
use crate::config::{ApiConfig, Config};
use crate::error::FetchError;
use crate::http::{HttpEngine, Method, Payload, RequestDescriptor, ReqwestTransport, Transport};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct QueryClient {
    engine: HttpEngine,
    config: Arc<ApiConfig>,
    focus_tx: broadcast::Sender<()>,
}

impl QueryClient {
    /// Client over HTTP(S) using reqwest.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(&config.api.user_agent)?;
        Ok(Self::with_transport(config.api.clone(), Arc::new(transport)))
    }

    pub fn with_transport(config: ApiConfig, transport: Arc<dyn Transport>) -> Self {
        let (focus_tx, _) = broadcast::channel(16);
        let engine = HttpEngine::new(
            transport,
            config.base_url.clone(),
            config.terminal_statuses.clone(),
        );
        Self {
            engine,
            config: Arc::new(config),
            focus_tx,
        }
    }

    pub fn engine(&self) -> &HttpEngine {
        &self.engine
    }

    pub fn cache(&self) -> &CacheStore<Payload> {
        self.engine.cache()
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Descriptor seeded with this client's timeout, retry and TTL settings.
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestDescriptor {
        RequestDescriptor::with_config(method, path, &self.config)
    }

    /// Cached GET seeded from config.
    pub fn query(&self, path: impl Into<String>) -> RequestDescriptor {
        self.request(Method::Get, path).use_cache(true)
    }

    /// One-shot typed read through cache and deduplicator.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        self.engine.fetch(request, cancel).await?.parse()
    }

    /// Drop `key` from the cache. A read already in flight for it is
    /// detached, so the next read makes a fresh request.
    pub fn invalidate(&self, key: &str) -> bool {
        self.engine.invalidate(key)
    }

    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        self.engine.invalidate_matching(pattern)
    }

    pub fn invalidate_all(&self) {
        self.engine.clear();
    }

    /// Host signal: the application regained foreground focus.
    pub fn notify_focus(&self) {
        let listeners = self.focus_tx.send(()).unwrap_or(0);
        debug!(listeners, "focus regained");
    }

    pub fn subscribe_focus(&self) -> broadcast::Receiver<()> {
        self.focus_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{MockReply, MockTransport};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Market {
        id: String,
        title: String,
    }

    fn client(mock: &MockTransport) -> QueryClient {
        QueryClient::with_transport(ApiConfig::default(), Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_typed_fetch() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})));
        let client = client(&mock);

        let market: Market = client
            .fetch(&client.query("/markets/7"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(market, Market { id: "7".into(), title: "X".into() });
    }

    #[tokio::test]
    async fn test_pattern_invalidation_forces_network() {
        let mock = MockTransport::new();
        mock.on("/markets", MockReply::json(200, json!([])));
        mock.on("/markets/42", MockReply::json(200, json!({"id": "42", "title": "Y"})));
        mock.on("/events/1", MockReply::json(200, json!({"id": "1", "title": "E"})));
        let client = client(&mock);
        let token = CancellationToken::new();

        let list = client.query("/markets").param("limit", 20);
        let one = client.query("/markets/42");
        let event = client.query("/events/1");
        client.fetch::<Vec<Market>>(&list, &token).await.unwrap();
        client.fetch::<Market>(&one, &token).await.unwrap();
        client.fetch::<Market>(&event, &token).await.unwrap();
        assert_eq!(mock.total_calls(), 3);

        let removed = client.invalidate_matching(&Regex::new("^/markets").unwrap());
        assert_eq!(removed, 2);
        assert!(client.cache().get(event.key().as_str()).is_some());

        client.fetch::<Market>(&one, &token).await.unwrap();
        client.fetch::<Market>(&event, &token).await.unwrap();
        assert_eq!(mock.calls("/markets/42"), 2);
        assert_eq!(mock.calls("/events/1"), 1);
    }

    #[tokio::test]
    async fn test_focus_signal() {
        let mock = MockTransport::new();
        let client = client(&mock);
        let mut rx = client.subscribe_focus();
        client.notify_focus();
        assert!(rx.recv().await.is_ok());
    }
}
