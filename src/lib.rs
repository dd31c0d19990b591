//! Client-side data layer for the surebet market front-end.
//!
//! Everything a screen needs to talk to the Gamma API: a shared TTL cache,
//! in-flight request deduplication, a retrying HTTP engine, resource
//! bindings that keep one resource in sync, write operations that
//! invalidate what they touch, and cursor pagination.

pub mod cache;
pub mod client;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod http;
pub mod market;
pub mod mutation;
pub mod pagination;
pub mod query;

pub use cache::{CacheKey, CacheStore, Params};
pub use client::QueryClient;
pub use config::{ApiConfig, Config, ConfigError};
pub use error::FetchError;
pub use http::{Method, Payload, RequestDescriptor};
pub use mutation::{Invalidation, MutationExecutor, MutationState};
pub use pagination::{PageState, PaginatedBinding};
pub use query::{BindingState, QueryOptions, QueryResult, ResourceBinding};
