//! Resource bindings: a consumer's interest in one resource, kept in sync.
//!
//! A [`ResourceBinding`] is activated with a request descriptor and from
//! then on owns every fetch made on the consumer's behalf: the initial load,
//! polling refreshes, focus refreshes, manual refetches, and refreshes after
//! another component invalidates the key. State is published through a
//! `tokio::sync::watch` channel so any number of listeners can follow it.
//!
//! # State transitions
//!
//! ```text
//!   Idle ──activate──▶ Loading ──▶ Success(v) ──refetch──▶ Fetching ──▶ Success(v') | Error(e)
//!                        └──────▶ Error(e)
//! ```
//!
//! `Loading` means no data has ever arrived; `Fetching` means a refresh is in
//! flight while the last value is still shown. Errors keep that last value in
//! [`QueryResult::data`] until [`ResourceBinding::clear`] is called. Polling,
//! focus and invalidation refreshes are silent: state only changes once their
//! result lands.
//!
//! Every fetch carries a generation number. Only the most recent generation
//! may write state, and nothing lands after deactivation, so a slow response
//! for superseded params can never overwrite a newer one.
//!
//! # Example
//!
//! ```rust,ignore
//! let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
//! binding.activate(client.query("/markets/7"));
//!
//! let mut rx = binding.subscribe();
//! while rx.changed().await.is_ok() {
//!     render(&*rx.borrow());
//! }
//! ```

use crate::cache::{CacheEvent, CacheSubscription};
use crate::client::QueryClient;
use crate::error::FetchError;
use crate::http::{Payload, RequestDescriptor};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Lifecycle options for a binding.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Silently refetch on this cadence while active.
    pub poll_interval: Option<Duration>,
    /// Silently refetch when the host reports foreground focus.
    pub refetch_on_focus: bool,
    /// Silently refetch when someone else invalidates the bound key.
    pub refetch_on_invalidate: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            poll_interval: None,
            refetch_on_focus: false,
            refetch_on_invalidate: true,
        }
    }
}

impl QueryOptions {
    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    pub fn refetch_on_invalidate(mut self, enabled: bool) -> Self {
        self.refetch_on_invalidate = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindingState<T> {
    Idle,
    /// First fetch in flight, nothing to show yet.
    Loading,
    /// Refresh in flight, last value still shown.
    Fetching,
    Success(T),
    Error(FetchError),
}

/// What listeners see: the current state plus the last value obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub state: BindingState<T>,
    pub data: Option<T>,
}

impl<T> QueryResult<T> {
    fn idle() -> Self {
        Self {
            state: BindingState::Idle,
            data: None,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.state {
            BindingState::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, BindingState::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, BindingState::Loading)
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state, BindingState::Fetching)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, BindingState::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, BindingState::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Show Loading/Fetching; may answer from cache.
    Visible,
    /// Show Loading/Fetching; always goes to the network.
    Forced,
    /// No state change until the result; always goes to the network.
    Silent,
}

struct Activation {
    request: RequestDescriptor,
    token: CancellationToken,
    fetch_token: Option<CancellationToken>,
    runtime: Handle,
    _cache_sub: CacheSubscription<Payload>,
}

struct Inner<T> {
    client: QueryClient,
    options: QueryOptions,
    state: watch::Sender<QueryResult<T>>,
    /// Bumped for every fetch; only the latest may write state.
    generation: AtomicU64,
    /// Bumped for every (de)activation; cache events from older ones are ignored.
    epoch: AtomicU64,
    activation: Mutex<Option<Activation>>,
}

pub struct ResourceBinding<T> {
    inner: Arc<Inner<T>>,
}

impl<T> ResourceBinding<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(client: QueryClient, options: QueryOptions) -> Self {
        let (state, _) = watch::channel(QueryResult::idle());
        Self {
            inner: Arc::new(Inner {
                client,
                options,
                state,
                generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                activation: Mutex::new(None),
            }),
        }
    }

    /// Bind to `request`, replacing any previous activation. Outside a
    /// Tokio runtime the binding stays inactive and reports an error.
    pub fn activate(&self, request: RequestDescriptor) {
        let inner = &self.inner;
        let key = request.key();
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(key = %key, error = %e, "binding activated outside a Tokio runtime");
                self.deactivate();
                inner.state.send_modify(|r| {
                    r.state = BindingState::Error(FetchError::InvalidRequest(
                        "no Tokio runtime to run fetches on".to_string(),
                    ));
                });
                return;
            }
        };
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let weak = Arc::downgrade(inner);
        let cache_sub = inner
            .client
            .cache()
            .subscribe(key.clone(), move |event| on_cache_event(&weak, epoch, event));

        let token = CancellationToken::new();
        let previous = lock(&inner.activation).replace(Activation {
            request,
            token: token.clone(),
            fetch_token: None,
            runtime: runtime.clone(),
            _cache_sub: cache_sub,
        });
        if let Some(prev) = previous {
            prev.token.cancel();
        }
        debug!(key = %key, epoch, "binding activated");

        Inner::start_fetch(inner, FetchMode::Visible);

        if let Some(period) = inner.options.poll_interval {
            runtime.spawn(poll_loop(Arc::downgrade(inner), token.clone(), period));
        }
        if inner.options.refetch_on_focus {
            let focus = inner.client.subscribe_focus();
            runtime.spawn(focus_loop(Arc::downgrade(inner), token, focus));
        }
    }

    /// Stop everything this binding started. Any in-flight result is
    /// discarded. Safe to call repeatedly.
    pub fn deactivate(&self) {
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.generation.fetch_add(1, Ordering::SeqCst);

        let Some(prev) = lock(&inner.activation).take() else {
            return;
        };
        prev.token.cancel();
        debug!(key = %prev.request.key(), "binding deactivated");

        // Nothing is in flight any more.
        inner.state.send_if_modified(|r| match r.state {
            BindingState::Loading => {
                r.state = BindingState::Idle;
                true
            }
            BindingState::Fetching => {
                r.state = match &r.data {
                    Some(v) => BindingState::Success(v.clone()),
                    None => BindingState::Idle,
                };
                true
            }
            _ => false,
        });
    }

    /// Invalidate the bound key and fetch it again over the network.
    pub fn refetch(&self) {
        let key = match lock(&self.inner.activation).as_ref() {
            Some(act) => act.request.key(),
            None => return,
        };
        self.inner.client.invalidate(key.as_str());
        Inner::start_fetch(&self.inner, FetchMode::Forced);
    }

    /// Forget the last value and return to `Idle`.
    pub fn clear(&self) {
        self.inner.state.send_replace(QueryResult::idle());
    }

    pub fn state(&self) -> QueryResult<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryResult<T>> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.activation).is_some()
    }

    pub fn request(&self) -> Option<RequestDescriptor> {
        lock(&self.inner.activation).as_ref().map(|a| a.request.clone())
    }
}

impl<T> Drop for ResourceBinding<T> {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let prev = lock(&self.inner.activation).take();
        if let Some(prev) = prev {
            prev.token.cancel();
        }
    }
}

impl<T> Inner<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn start_fetch(inner: &Arc<Self>, mode: FetchMode) {
        let (request, token, runtime) = {
            let mut guard = lock(&inner.activation);
            let Some(act) = guard.as_mut() else {
                return;
            };
            if let Some(prev) = act.fetch_token.take() {
                prev.cancel();
            }
            let token = act.token.child_token();
            act.fetch_token = Some(token.clone());
            (act.request.clone(), token, act.runtime.clone())
        };
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if mode != FetchMode::Silent {
            inner.state.send_modify(|r| {
                r.state = if r.data.is_some() {
                    BindingState::Fetching
                } else {
                    BindingState::Loading
                };
            });
        }

        let inner = Arc::clone(inner);
        runtime.spawn(async move {
            let engine = inner.client.engine();
            let result = match mode {
                FetchMode::Visible => engine.fetch(&request, &token).await,
                FetchMode::Forced | FetchMode::Silent => engine.revalidate(&request, &token).await,
            };
            let result = result.and_then(|payload| payload.parse::<T>());

            let applied = inner.state.send_if_modified(|r| {
                if token.is_cancelled() || inner.generation.load(Ordering::SeqCst) != generation {
                    return false;
                }
                match &result {
                    Ok(value) => {
                        r.data = Some(value.clone());
                        r.state = BindingState::Success(value.clone());
                    }
                    Err(e) => r.state = BindingState::Error(e.clone()),
                }
                true
            });
            if !applied {
                debug!(key = %request.key(), generation, "discarded superseded result");
            }
        });
    }
}

fn on_cache_event<T>(weak: &Weak<Inner<T>>, epoch: u64, event: CacheEvent<'_, Payload>)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if inner.epoch.load(Ordering::SeqCst) != epoch {
        return;
    }
    match event {
        CacheEvent::Updated(payload) => match payload.parse::<T>() {
            Ok(value) => inner.state.send_modify(|r| {
                r.data = Some(value.clone());
                r.state = BindingState::Success(value);
            }),
            Err(e) => debug!(error = %e, "ignoring cache write of another shape"),
        },
        CacheEvent::Removed => {
            if inner.options.refetch_on_invalidate {
                Inner::start_fetch(&inner, FetchMode::Silent);
            }
        }
    }
}

async fn poll_loop<T>(weak: Weak<Inner<T>>, token: CancellationToken, period: Duration)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately; activation already fetched.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = weak.upgrade() else { break };
                Inner::start_fetch(&inner, FetchMode::Silent);
            }
        }
    }
}

async fn focus_loop<T>(weak: Weak<Inner<T>>, token: CancellationToken, mut focus: broadcast::Receiver<()>)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            signal = focus.recv() => {
                if matches!(signal, Err(broadcast::error::RecvError::Closed)) {
                    break;
                }
                let Some(inner) = weak.upgrade() else { break };
                Inner::start_fetch(&inner, FetchMode::Silent);
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::http::mock::{MockReply, MockTransport};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Market {
        id: String,
        title: String,
    }

    fn market(id: &str, title: &str) -> Market {
        Market {
            id: id.into(),
            title: title.into(),
        }
    }

    fn client(mock: &MockTransport) -> QueryClient {
        let config = ApiConfig {
            max_retries: 0,
            ..ApiConfig::default()
        };
        QueryClient::with_transport(config, Arc::new(mock.clone()))
    }

    async fn settle<T: Clone>(rx: &mut watch::Receiver<QueryResult<T>>) -> QueryResult<T> {
        rx.wait_for(|r| !r.is_loading() && !r.is_fetching())
            .await
            .map(|r| (*r).clone())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_loading_success() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        assert!(binding.state().is_idle());

        binding.activate(client.query("/markets/7"));
        assert!(binding.state().is_loading());

        let mut rx = binding.subscribe();
        let result = settle(&mut rx).await;
        assert_eq!(result.state, BindingState::Success(market("7", "X")));
        assert_eq!(binding.data(), Some(market("7", "X")));
        assert_eq!(mock.calls("/markets/7"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_goes_to_network_and_shows_fetching() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})))
            .on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "Y"})));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));
        let mut rx = binding.subscribe();
        settle(&mut rx).await;

        binding.refetch();
        let during = binding.state();
        assert!(during.is_fetching());
        assert_eq!(during.data, Some(market("7", "X")));

        let result = settle(&mut rx).await;
        assert_eq!(result.state, BindingState::Success(market("7", "Y")));
        assert_eq!(mock.calls("/markets/7"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_during_initial_load_makes_new_request() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "old"})).delayed(Duration::from_millis(200)))
            .on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "new"})).delayed(Duration::from_millis(20)));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        binding.refetch();
        assert!(binding.state().is_loading());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(binding.state().state, BindingState::Success(market("7", "new")));
        assert_eq!(mock.calls("/markets/7"), 2);
        assert_eq!(
            client.cache().get("/markets/7"),
            Some(Payload::Json(json!({"id": "7", "title": "new"})))
        );
    }

    #[test]
    fn test_activate_outside_runtime_reports_error() {
        let client = client(&MockTransport::new());
        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));

        let state = binding.state();
        assert!(matches!(state.error(), Some(FetchError::InvalidRequest(_))));
        assert!(!binding.is_active());
        assert_eq!(client.cache().subscriber_count("/markets/7"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_previous_data() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})))
            .on("/markets/7", MockReply::status(500));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));
        let mut rx = binding.subscribe();
        settle(&mut rx).await;

        binding.refetch();
        let result = settle(&mut rx).await;
        assert_eq!(result.error().and_then(FetchError::status), Some(500));
        assert_eq!(result.data, Some(market("7", "X")));

        binding.clear();
        assert_eq!(binding.state(), QueryResult::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_error() {
        let mock = MockTransport::new();
        mock.on("/markets/404", MockReply::status(404));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/404"));
        let mut rx = binding.subscribe();
        let result = settle(&mut rx).await;
        assert!(result.is_error());
        assert_eq!(result.data, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_params_never_land() {
        let mock = MockTransport::new();
        mock.on("/markets", MockReply::json(200, json!({"id": "p1", "title": "old"})).delayed(Duration::from_millis(200)))
            .on("/markets", MockReply::json(200, json!({"id": "p2", "title": "new"})).delayed(Duration::from_millis(10)));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets").param("page", 1));
        // Let P1 reach the transport before switching.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(mock.calls("/markets"), 1);

        binding.activate(client.query("/markets").param("page", 2));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(binding.state().state, BindingState::Success(market("p2", "new")));
        assert_eq!(mock.calls("/markets"), 2);
        // P1 was cancelled, so it never reached the cache either.
        let p1 = client.query("/markets").param("page", 1).key();
        assert!(client.cache().get(p1.as_str()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_discards_in_flight() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})).delayed(Duration::from_millis(100)));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        binding.deactivate();
        assert!(binding.state().is_idle());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(binding.state().is_idle());
        assert!(client.cache().is_empty());
        assert_eq!(client.cache().subscriber_count("/markets/7"), 0);
        assert!(!binding.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_refreshes_silently() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})));
        let client = client(&mock);

        let options = QueryOptions::default().poll_every(Duration::from_secs(1));
        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), options);
        binding.activate(client.query("/markets/7"));

        let mut rx = binding.subscribe();
        settle(&mut rx).await;

        let watcher = tokio::spawn(async move {
            let mut saw_refresh_state = false;
            while rx.changed().await.is_ok() {
                let current = rx.borrow().clone();
                saw_refresh_state |= current.is_loading() || current.is_fetching();
            }
            saw_refresh_state
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(mock.calls("/markets/7"), 4);

        drop(binding);
        assert!(!watcher.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_on_focus() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})));
        let client = client(&mock);

        let options = QueryOptions::default().refetch_on_focus(true);
        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), options);
        binding.activate(client.query("/markets/7"));
        let mut rx = binding.subscribe();
        settle(&mut rx).await;

        client.notify_focus();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.calls("/markets/7"), 2);
        assert!(binding.state().is_success());

        binding.deactivate();
        client.notify_focus();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.calls("/markets/7"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_writers_update_binding() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})))
            .on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "Z"})));
        let client = client(&mock);

        let a: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        a.activate(client.query("/markets/7"));
        let mut rx = a.subscribe();
        settle(&mut rx).await;

        // A second consumer forces a fresh read of the same key.
        let b: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        b.activate(client.query("/markets/7"));
        assert_eq!(b.data(), None);
        b.refetch();
        let mut rb = b.subscribe();
        settle(&mut rb).await;

        assert_eq!(a.data(), Some(market("7", "Z")));
        assert_eq!(mock.calls("/markets/7"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_triggers_silent_refetch() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})))
            .on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "Y"})));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));
        let mut rx = binding.subscribe();
        settle(&mut rx).await;

        client.invalidate("/markets/7");
        assert!(binding.state().is_success());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(binding.data(), Some(market("7", "Y")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_subscription() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})));
        let client = client(&mock);

        let binding: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        binding.activate(client.query("/markets/7"));
        assert_eq!(client.cache().subscriber_count("/markets/7"), 1);

        // Re-activating on the same key swaps the registration.
        binding.activate(client.query("/markets/7"));
        assert_eq!(client.cache().subscriber_count("/markets/7"), 1);

        drop(binding);
        assert_eq!(client.cache().subscriber_count("/markets/7"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_value_serves_second_binding() {
        let mock = MockTransport::new();
        mock.on("/markets/7", MockReply::json(200, json!({"id": "7", "title": "X"})));
        let client = client(&mock);

        let a: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        let b: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        a.activate(client.query("/markets/7"));
        b.activate(client.query("/markets/7"));

        let (mut ra, mut rb) = (a.subscribe(), b.subscribe());
        settle(&mut ra).await;
        settle(&mut rb).await;
        assert_eq!(mock.calls("/markets/7"), 1);

        let c: ResourceBinding<Market> = ResourceBinding::new(client.clone(), QueryOptions::default());
        c.activate(client.query("/markets/7"));
        let mut rc = c.subscribe();
        assert!(settle(&mut rc).await.is_success());
        assert_eq!(mock.calls("/markets/7"), 1);
    }
}
