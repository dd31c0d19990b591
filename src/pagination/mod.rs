//! Cursor-driven pagination that accumulates pages in order.
//!
//! The cursor for the next page is derived from the page just received by a
//! caller-supplied `next_param` function. `None` ends the sequence.
//!
//! ```rust,ignore
//! let feed = PaginatedBinding::<Feed>::new(
//!     client.clone(),
//!     client.query("/events"),
//!     "cursor",
//!     "",
//!     |page: &Feed| page.next_cursor.clone().map(Value::from),
//! );
//! while feed.fetch_next().await {}
//! ```
//!
//! Offset-style APIs, where the next cursor depends on the one just used,
//! go through [`PaginatedBinding::with_cursor`].

use crate::client::QueryClient;
use crate::error::FetchError;
use crate::http::RequestDescriptor;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type NextParam<T> = Box<dyn Fn(&T, &Value) -> Option<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct PageState<T> {
    pub pages: Vec<T>,
    pub has_more: bool,
    pub is_fetching: bool,
    pub error: Option<FetchError>,
}

impl<T> PageState<T> {
    fn fresh() -> Self {
        Self {
            pages: Vec::new(),
            has_more: true,
            is_fetching: false,
            error: None,
        }
    }
}

struct Control {
    generation: u64,
    token: CancellationToken,
    next_cursor: Option<Value>,
    in_flight: bool,
    active: bool,
    /// Set by `refetch`: pages of this generation skip cached copies.
    revalidate: bool,
}

struct Inner<T> {
    client: QueryClient,
    base: RequestDescriptor,
    cursor_param: String,
    initial: Value,
    next_param: NextParam<T>,
    state: watch::Sender<PageState<T>>,
    control: Mutex<Control>,
}

pub struct PaginatedBinding<T> {
    inner: Arc<Inner<T>>,
}

impl<T> PaginatedBinding<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new<F>(
        client: QueryClient,
        base: RequestDescriptor,
        cursor_param: impl Into<String>,
        initial: impl Into<Value>,
        next_param: F,
    ) -> Self
    where
        F: Fn(&T) -> Option<Value> + Send + Sync + 'static,
    {
        Self::with_cursor(client, base, cursor_param, initial, move |page, _| next_param(page))
    }

    /// Like [`PaginatedBinding::new`], but `next_param` also sees the cursor
    /// that produced the page.
    pub fn with_cursor<F>(
        client: QueryClient,
        base: RequestDescriptor,
        cursor_param: impl Into<String>,
        initial: impl Into<Value>,
        next_param: F,
    ) -> Self
    where
        F: Fn(&T, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let initial = initial.into();
        let (state, _) = watch::channel(PageState::fresh());
        Self {
            inner: Arc::new(Inner {
                client,
                base,
                cursor_param: cursor_param.into(),
                next_param: Box::new(next_param),
                state,
                control: Mutex::new(Control {
                    generation: 0,
                    token: CancellationToken::new(),
                    next_cursor: Some(initial.clone()),
                    in_flight: false,
                    active: true,
                    revalidate: false,
                }),
                initial,
            }),
        }
    }

    /// Load the next page. Returns `true` if a page was appended, `false`
    /// when nothing was fetched (already in flight, no more pages,
    /// deactivated) or the fetch failed or was superseded.
    pub async fn fetch_next(&self) -> bool {
        let inner = &self.inner;
        let (generation, token, request, cursor, revalidate) = {
            let mut control = inner.lock();
            if !control.active || control.in_flight {
                return false;
            }
            let Some(cursor) = control.next_cursor.clone() else {
                return false;
            };
            control.in_flight = true;
            inner.state.send_modify(|s| s.is_fetching = true);
            let request = inner.base.clone().param(inner.cursor_param.clone(), cursor.clone());
            (control.generation, control.token.clone(), request, cursor, control.revalidate)
        };

        let mut flight = FlightGuard {
            inner,
            generation,
            armed: true,
        };

        let engine = inner.client.engine();
        let payload = if revalidate {
            engine.revalidate(&request, &token).await
        } else {
            engine.fetch(&request, &token).await
        };
        let result = payload.and_then(|p| p.parse::<T>());

        let mut control = inner.lock();
        flight.armed = false;
        if control.generation != generation || token.is_cancelled() {
            debug!(path = %request.path, "discarding superseded page");
            return false;
        }
        control.in_flight = false;

        match result {
            Ok(page) => {
                let next = (inner.next_param)(&page, &cursor);
                let has_more = next.is_some();
                control.next_cursor = next;
                inner.state.send_modify(|s| {
                    s.pages.push(page);
                    s.has_more = has_more;
                    s.is_fetching = false;
                    s.error = None;
                });
                true
            }
            Err(e) => {
                // Cursor is kept so the same page can be retried.
                inner.state.send_modify(|s| {
                    s.is_fetching = false;
                    s.error = Some(e);
                });
                false
            }
        }
    }

    /// Drop every page and start over from the initial cursor.
    pub async fn refetch(&self) -> bool {
        {
            let mut control = self.inner.lock();
            self.inner.reset(&mut control);
            control.next_cursor = Some(self.inner.initial.clone());
            control.active = true;
            control.revalidate = true;
            self.inner.state.send_replace(PageState::fresh());
        }
        self.fetch_next().await
    }

    /// Cancel any in-flight page and stop. Pages already loaded stay.
    pub fn deactivate(&self) {
        let mut control = self.inner.lock();
        self.inner.reset(&mut control);
        control.active = false;
        self.inner.state.send_modify(|s| s.is_fetching = false);
    }

    pub fn state(&self) -> PageState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PageState<T>> {
        self.inner.state.subscribe()
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reset(&self, control: &mut Control) {
        control.token.cancel();
        control.token = CancellationToken::new();
        control.generation += 1;
        control.in_flight = false;
    }
}

impl<T> Drop for PaginatedBinding<T> {
    fn drop(&mut self) {
        self.inner.lock().token.cancel();
    }
}

/// Clears the in-flight flag if a `fetch_next` future is dropped mid-flight.
struct FlightGuard<'a, T> {
    inner: &'a Inner<T>,
    generation: u64,
    armed: bool,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut control = self.inner.lock();
        if control.generation == self.generation {
            control.in_flight = false;
            self.inner.state.send_modify(|s| s.is_fetching = false);
        }
    }
}
