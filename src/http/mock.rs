//! Scripted in-memory transport for tests.
//!
//! Replies are queued per URL path. The last queued reply for a path keeps
//! being served once the queue is down to one, so a single `on()` call
//! scripts a permanently healthy (or permanently failing) endpoint.
//! Unscripted paths answer 404.
//!
//! ```
//! use surebet_data::http::mock::{MockReply, MockTransport};
//!
//! let mock = MockTransport::new();
//! mock.on("/markets/7", MockReply::json(200, serde_json::json!({"id": "7"})));
//! assert_eq!(mock.calls("/markets/7"), 0);
//! ```

use super::transport::{PreparedRequest, RawResponse, Transport};
use crate::error::FetchError;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Url;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum MockReply {
    Response(RawResponse),
    Error(FetchError),
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        MockReply::Response(RawResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string().into_bytes(),
        })
    }

    pub fn text(status: u16, body: &str) -> Self {
        MockReply::Response(RawResponse {
            status,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: body.as_bytes().to_vec(),
        })
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        MockReply::Response(RawResponse {
            status,
            content_type: Some("application/octet-stream".to_string()),
            body,
        })
    }

    pub fn status(status: u16) -> Self {
        MockReply::Response(RawResponse {
            status,
            content_type: None,
            body: Vec::new(),
        })
    }

    pub fn error(err: FetchError) -> Self {
        MockReply::Error(err)
    }

    pub fn delayed(self, delay: Duration) -> Self {
        MockReply::Delayed(delay, Box::new(self))
    }
}

/// One request the mock has seen.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: PreparedRequest,
    pub path: String,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    routes: HashMap<String, VecDeque<MockReply>>,
    calls: Vec<RecordedCall>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for requests to `path`.
    pub fn on(&self, path: &str, reply: MockReply) -> &Self {
        self.lock()
            .routes
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Replace everything queued for `path` with `reply`.
    pub fn reset(&self, path: &str, reply: MockReply) -> &Self {
        let mut state = self.lock();
        let queue = state.routes.entry(path.to_string()).or_default();
        queue.clear();
        queue.push_back(reply);
        drop(state);
        self
    }

    pub fn calls(&self, path: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.path == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, path: &str) -> MockReply {
        let mut state = self.lock();
        match state.routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockReply::status(404)),
            Some(queue) => queue.front().cloned().unwrap_or(MockReply::status(404)),
            None => MockReply::status(404),
        }
    }
}

/// `https://host/a/b` → `/a/b`. Relative URLs come back unchanged.
fn path_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    }
}

impl Transport for MockTransport {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'static, Result<RawResponse, FetchError>> {
        let path = path_of(&request.url);
        let reply = self.next_reply(&path);
        self.lock().calls.push(RecordedCall {
            request,
            path,
            at: Instant::now(),
        });

        async move {
            let mut reply = reply;
            loop {
                match reply {
                    MockReply::Response(resp) => return Ok(resp),
                    MockReply::Error(err) => return Err(err),
                    MockReply::Delayed(delay, inner) => {
                        tokio::time::sleep(delay).await;
                        reply = *inner;
                    }
                }
            }
        }
        .boxed()
    }
}
