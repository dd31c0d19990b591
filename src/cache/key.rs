//! Cache key derivation.
//!
//! A key is the resource path, followed by `?` and the params as a JSON
//! object with sorted keys when any params are present:
//!   /markets                          (no params)
//!   /markets?{"active":true,"limit":20}
//!
//! Every key for a path therefore starts with that path, which is what
//! prefix patterns like `^/markets` match against.

use serde::Serialize;
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Query parameters for a request. Ordered, so serialization is canonical
/// regardless of insertion order. Null values are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.set(name, value);
        self
    }

    /// Set a parameter. `None`/null values remove the parameter instead.
    pub fn set(&mut self, name: impl Into<String>, value: impl Serialize) {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(Value::Null) => {
                self.0.remove(&name);
            }
            Ok(v) => {
                self.0.insert(name, v);
            }
            Err(e) => {
                warn!(param = %name, error = %e, "dropping unserializable query parameter");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Pairs suitable for a URL query string. Strings go out verbatim,
    /// everything else in its JSON text form.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect()
    }

    fn canonical(&self) -> String {
        // BTreeMap serializes in key order.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Deterministic identifier for one resource + parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(path: &str, params: &Params) -> Self {
        if params.is_empty() {
            CacheKey(path.to_string())
        } else {
            CacheKey(format!("{}?{}", path, params.canonical()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        CacheKey(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
