//! Cache invalidation middleware and programmatic deletion.
//!
//! Invalidation is advisory: a failed deletion degrades to serving stale
//! data until natural expiry, which beats blocking the mutating request that
//! triggered it. The middleware therefore recovers every error locally and
//! always calls the downstream continuation exactly once.
//!
//! The programmatic functions ([`delete_key`], [`delete_pattern`]) are the
//! one exception to fail-open: callers invoking them explicitly expect a
//! definite outcome, so an unavailable store surfaces as
//! [`StoreError::Unavailable`].

use std::future::Future;
use std::pin::Pin;

use crate::context::Context;
use crate::http::Response;
use crate::middleware::{Middleware, Next};
use crate::store::{StoreError, StoreHandle};

use super::DEFAULT_PREFIX;
use super::key::{KeySpec, derive_key};

// What to delete. Tagged variant instead of independent optional fields, so
// the "pattern wins over keys" precedence cannot arise in the first place.
#[derive(Clone, Debug)]
enum Target {
    /// One key, derived from the request with the usual rules.
    Key(KeySpec),
    /// A list of literal key bodies, each prefixed.
    Keys(Vec<String>),
    /// A glob pattern, used against the store verbatim.
    Pattern(String),
}

/// Per-route invalidation configuration, resolved once at middleware
/// construction time.
///
/// # Examples
///
/// ```
/// use readthru::cache::{InvalidateOptions, KeySpec};
///
/// // Delete the cached GET for the same path on every mutation.
/// let by_request = InvalidateOptions::key(KeySpec::derived(|req| {
///     format!("GET:{}", req.full_path())
/// }));
///
/// // Or sweep a whole namespace.
/// let by_pattern = InvalidateOptions::pattern("cache:GET:/api/users*");
/// ```
#[derive(Clone, Debug)]
pub struct InvalidateOptions {
    target: Target,
    prefix: String,
}

impl Default for InvalidateOptions {
    /// Deletes the default method-and-path key under the `cache` prefix.
    fn default() -> Self {
        Self::key(KeySpec::MethodAndPath)
    }
}

impl InvalidateOptions {
    /// Invalidate a single key derived from the request.
    pub fn key(spec: KeySpec) -> Self {
        Self {
            target: Target::Key(spec),
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }

    /// Invalidate a fixed list of key bodies (each gets the prefix).
    pub fn keys<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: Target::Keys(bodies.into_iter().map(Into::into).collect()),
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }

    /// Invalidate every key matching a glob pattern (`*` any sequence, `?`
    /// one character). The pattern addresses the store directly and is not
    /// prefixed — include the namespace yourself.
    pub fn pattern(glob: impl Into<String>) -> Self {
        Self {
            target: Target::Pattern(glob.into()),
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }

    /// Key prefix applied to derived and literal keys.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Middleware deleting cached entries when a mutating request occurs.
///
/// Runs its deletions *before* the downstream handler and continues the
/// chain regardless of outcome — exactly once, on every path.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use readthru::cache::{InvalidateMiddleware, InvalidateOptions};
/// use readthru::middleware::from_middleware;
/// use readthru::store::StoreHandle;
///
/// # async fn build() -> Result<(), readthru::store::StoreError> {
/// let store = StoreHandle::connect("redis://127.0.0.1:6379").await?;
/// let invalidate = InvalidateMiddleware::new(
///     store,
///     InvalidateOptions::pattern("cache:GET:/api/users*"),
/// );
/// let handler = from_middleware(Arc::new(invalidate));
/// # Ok(())
/// # }
/// ```
pub struct InvalidateMiddleware {
    store: StoreHandle,
    options: InvalidateOptions,
}

impl InvalidateMiddleware {
    /// Creates the middleware for one route.
    pub fn new(store: StoreHandle, options: InvalidateOptions) -> Self {
        Self { store, options }
    }
}

impl Middleware for InvalidateMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let store = self.store.clone();
        let options = self.options.clone();
        Box::pin(async move {
            invalidate(&store, &options, &ctx).await;
            next.run(ctx).await
        })
    }
}

async fn invalidate(store: &StoreHandle, options: &InvalidateOptions, ctx: &Context) {
    if !store.is_available() {
        tracing::warn!(
            "cache store unavailable ({:?}); skipping invalidation",
            store.state()
        );
        return;
    }

    match &options.target {
        Target::Pattern(pattern) => match store.keys(pattern).await {
            Ok(keys) if keys.is_empty() => {
                tracing::debug!("no cached keys match {pattern}");
            }
            Ok(keys) => match store.del(&keys).await {
                Ok(count) => tracing::info!("invalidated {count} cached keys matching {pattern}"),
                Err(e) => tracing::error!("failed to delete keys matching {pattern}: {e}"),
            },
            Err(e) => tracing::error!("key scan for {pattern} failed: {e}"),
        },
        Target::Keys(bodies) => {
            let keys: Vec<String> = bodies
                .iter()
                .map(|body| format!("{}:{}", options.prefix, body))
                .collect();
            match store.del(&keys).await {
                Ok(count) => tracing::info!("invalidated {count} of {} cached keys", keys.len()),
                Err(e) => tracing::error!("failed to delete cached keys: {e}"),
            }
        }
        Target::Key(spec) => {
            let key = derive_key(ctx.request(), spec, &options.prefix);
            match store.del(std::slice::from_ref(&key)).await {
                Ok(count) => tracing::debug!("invalidated {key} ({count} deleted)"),
                Err(e) => tracing::error!("failed to delete {key}: {e}"),
            }
        }
    }
}

/// Deletes a single cache key; returns how many keys were actually removed
/// (0 or 1 — deleting an absent key is not an error).
///
/// # Errors
///
/// [`StoreError::Unavailable`] if the store is not ready, or the backend
/// error from the deletion itself.
pub async fn delete_key(store: &StoreHandle, key: &str) -> Result<u64, StoreError> {
    if !store.is_available() {
        return Err(StoreError::Unavailable);
    }
    store.del(std::slice::from_ref(&key.to_owned())).await
}

/// Deletes every key matching a glob pattern in one batch; returns the count
/// deleted.
///
/// # Errors
///
/// [`StoreError::Unavailable`] if the store is not ready, or the backend
/// error from the scan or deletion.
pub async fn delete_pattern(store: &StoreHandle, pattern: &str) -> Result<u64, StoreError> {
    if !store.is_available() {
        return Err(StoreError::Unavailable);
    }
    let keys = store.keys(pattern).await?;
    if keys.is_empty() {
        return Ok(0);
    }
    store.del(&keys).await
}
