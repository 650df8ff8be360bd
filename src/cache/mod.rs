//! Request-scoped response caching over a key-value store.
//!
//! Two middlewares compose around a shared [`StoreHandle`]:
//!
//! - [`CacheMiddleware`] — read-through: serves cached responses for safe
//!   requests and populates the store on miss, fire-and-forget.
//! - [`InvalidateMiddleware`] — deletes cached entries (explicit, derived, or
//!   pattern-matched) when mutating requests occur, then always continues.
//!
//! Caching is strictly best-effort: an unreachable, slow, or erroring store
//! never fails a request. The only behavior change a caller can observe is
//! a cache hit short-circuiting the downstream chain.
//!
//! [`StoreHandle`]: crate::store::StoreHandle

pub mod invalidate;
pub mod key;
pub mod read_through;

pub use invalidate::{InvalidateMiddleware, InvalidateOptions, delete_key, delete_pattern};
pub use key::{KeySpec, derive_key};
pub use read_through::{CacheMiddleware, CacheOptions};

use serde::Serialize;

/// Boxed error for cacheability predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default key prefix for both caching and invalidation configurations.
pub const DEFAULT_PREFIX: &str = "cache";

/// Per-request cache outcome, attached to the response extensions by
/// [`CacheMiddleware`] for downstream instrumentation.
///
/// `ttl` is populated when an entry was written to the store for this
/// request. The record is observability-only and never persisted.
///
/// # Examples
///
/// ```rust,no_run
/// use readthru::cache::CacheStatus;
/// # let response = readthru::Response::default();
///
/// if let Some(status) = response.extensions().get::<CacheStatus>() {
///     println!("hit={} key={}", status.hit, status.key);
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    /// Whether the response came from the store.
    pub hit: bool,
    /// The derived store key, or empty if derivation never ran.
    pub key: String,
    /// Expiry the write-back was dispatched with, in seconds.
    ///
    /// Recorded when the write is scheduled, before the detached task
    /// completes: a store failure after the response has been delivered can
    /// leave this set with no entry present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CacheStatus {
    pub(crate) fn miss() -> Self {
        Self {
            hit: false,
            key: String::new(),
            ttl: None,
        }
    }
}
