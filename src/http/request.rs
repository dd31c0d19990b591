//! Request descriptors: one fully enumerated struct per logical request.

use crate::cache::{CacheKey, Params};
use crate::config::ApiConfig;
use crate::error::FetchError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Everything except GET has side effects.
    pub fn is_write(self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Patch => write!(f, "PATCH"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Configuration for one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub params: Params,
    /// JSON body, only sent for non-GET methods.
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Budget for each attempt, not for the whole request.
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub use_cache: bool,
    /// `None` caches without expiry.
    pub cache_ttl: Option<Duration>,
    /// Ignored for writes, which are never deduplicated.
    pub dedupe: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            body: None,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            use_cache: false,
            cache_ttl: Some(DEFAULT_CACHE_TTL),
            dedupe: !method.is_write(),
        }
    }

    /// Same as [`RequestDescriptor::new`] but with retry, timeout and TTL
    /// defaults taken from `config`.
    pub fn with_config(method: Method, path: impl Into<String>, config: &ApiConfig) -> Self {
        Self::new(method, path)
            .timeout(Duration::from_millis(config.timeout_ms))
            .max_retries(config.max_retries)
            .backoff_base(Duration::from_millis(config.backoff_base_ms))
            .cache_ttl(Duration::from_millis(config.cache_ttl_ms))
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// A cached GET, the default for resource bindings.
    pub fn query(path: impl Into<String>) -> Self {
        Self::get(path).use_cache(true)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.params.set(name, value);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json(mut self, body: &impl Serialize) -> Result<Self, FetchError> {
        let value =
            serde_json::to_value(body).map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn no_expiry(mut self) -> Self {
        self.cache_ttl = None;
        self
    }

    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.path, &self.params)
    }

    /// Reads only. Writes never touch the cache.
    pub(crate) fn caches(&self) -> bool {
        self.use_cache && !self.method.is_write()
    }

    pub(crate) fn dedupes(&self) -> bool {
        self.dedupe && !self.method.is_write()
    }
}
