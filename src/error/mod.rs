//! Error taxonomy shared by every layer of the data client.
//!
//! `FetchError` is `Clone` because a single deduplicated operation hands the
//! same outcome to every caller attached to it.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Transport failed before any response arrived.
    #[error("network error: {0}")]
    Network(String),
    /// A single attempt exceeded its time budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The server answered with a non-2xx status.
    #[error("server returned status {status}")]
    HttpStatus { status: u16, body: Option<Value> },
    /// The operation was cancelled deliberately.
    #[error("request aborted")]
    Aborted,
    /// A successful response could not be decoded into the requested shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// The request could not be built (bad URL, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether retrying could plausibly succeed, given the configured set of
    /// terminal HTTP statuses.
    pub fn is_retryable(&self, terminal_statuses: &[u16]) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::HttpStatus { status, .. } => !terminal_statuses.contains(status),
            FetchError::Aborted | FetchError::Decode(_) | FetchError::InvalidRequest(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, FetchError::Aborted)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FetchError::InvalidRequest(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}
