//! Read-through cache middleware.
//!
//! On a safe request, checks the store and serves a hit verbatim — the
//! downstream chain never runs. On a miss, the downstream response is
//! captured on its way back out; 2xx JSON bodies are written to the store
//! with the configured expiry as a detached task, never delaying delivery.
//!
//! Every store failure mode (unavailable handle, timed-out read, backend
//! error, failing predicate) degrades to an uncached pass-through. Nothing in
//! this module can fail the request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::http::{Request, Response, StatusCode};
use crate::middleware::{Middleware, Next};
use crate::store::{StoreError, StoreHandle};

use super::key::{KeySpec, derive_key};
use super::{BoxError, CacheStatus, DEFAULT_PREFIX};

/// Async cacheability predicate. Receives its own clone of the request
/// (bodies are reference-counted, so the clone is cheap).
pub type CachePredicate = Arc<
    dyn Fn(Request) -> Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send>> + Send + Sync,
>;

/// Per-route read-through configuration, resolved once at middleware
/// construction time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use readthru::cache::{CacheOptions, KeySpec};
///
/// let options = CacheOptions::default()
///     .ttl(300)
///     .prefix("api")
///     .key(KeySpec::literal("users-index"))
///     .timeout(Duration::from_millis(250));
/// ```
#[derive(Clone)]
pub struct CacheOptions {
    pub(crate) ttl: u64,
    pub(crate) key: KeySpec,
    pub(crate) prefix: String,
    pub(crate) is_cacheable: Option<CachePredicate>,
    pub(crate) timeout: Duration,
}

impl Default for CacheOptions {
    /// 60 s expiry, method-and-path key under the `cache` prefix, always
    /// cacheable, 5 s store-read deadline.
    fn default() -> Self {
        Self {
            ttl: 60,
            key: KeySpec::default(),
            prefix: DEFAULT_PREFIX.to_owned(),
            is_cacheable: None,
            timeout: Duration::from_secs(5),
        }
    }
}

impl CacheOptions {
    /// Entry expiry in seconds.
    #[must_use]
    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl = seconds;
        self
    }

    /// Key body derivation for this route.
    #[must_use]
    pub fn key(mut self, spec: KeySpec) -> Self {
        self.key = spec;
        self
    }

    /// Key prefix (namespace).
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Deadline for the store read; a slower lookup degrades to a miss.
    #[must_use]
    pub fn timeout(mut self, deadline: Duration) -> Self {
        self.timeout = deadline;
        self
    }

    /// Restricts caching with an async predicate.
    ///
    /// A predicate returning `Ok(false)` or `Err(_)` makes the request pass
    /// through uncached; errors are logged and never propagate.
    ///
    /// # Examples
    ///
    /// ```
    /// use readthru::cache::CacheOptions;
    ///
    /// // Never cache requests carrying an Authorization header.
    /// let options = CacheOptions::default().cacheable_if(|req| async move {
    ///     Ok(!req.headers().contains("authorization"))
    /// });
    /// ```
    #[must_use]
    pub fn cacheable_if<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.is_cacheable = Some(Arc::new(move |req| Box::pin(predicate(req))));
        self
    }
}

/// Middleware serving cached responses for safe requests and populating the
/// store on miss.
///
/// Construct once per protected route and place it directly in front of the
/// handler it shields. Non-safe methods (POST, PUT, DELETE, PATCH ...) pass
/// through untouched — no key is computed and no store I/O happens.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use readthru::cache::{CacheMiddleware, CacheOptions};
/// use readthru::middleware::from_middleware;
/// use readthru::store::StoreHandle;
///
/// # async fn build() -> Result<(), readthru::store::StoreError> {
/// let store = StoreHandle::connect("redis://127.0.0.1:6379").await?;
/// let cache = CacheMiddleware::new(store, CacheOptions::default().ttl(120));
/// let handler = from_middleware(Arc::new(cache));
/// # Ok(())
/// # }
/// ```
pub struct CacheMiddleware {
    store: StoreHandle,
    options: CacheOptions,
}

impl CacheMiddleware {
    /// Creates the middleware for one route.
    pub fn new(store: StoreHandle, options: CacheOptions) -> Self {
        Self { store, options }
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let store = self.store.clone();
        let options = self.options.clone();
        Box::pin(read_through(store, options, ctx, next))
    }
}

async fn read_through(
    store: StoreHandle,
    options: CacheOptions,
    ctx: Context,
    next: Next,
) -> Response {
    // Mutating methods are not candidates: no key, no store I/O, no status.
    if !ctx.request().method().is_safe() {
        return next.run(ctx).await;
    }

    let mut status = CacheStatus::miss();

    if let Some(predicate) = &options.is_cacheable {
        match predicate(ctx.request().clone()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    "request {} not cacheable by predicate; passing through",
                    ctx.request().full_path()
                );
                return attach(next.run(ctx).await, status);
            }
            Err(e) => {
                tracing::warn!("cacheability predicate failed: {e}; treating as not cacheable");
                return attach(next.run(ctx).await, status);
            }
        }
    }

    let key = derive_key(ctx.request(), &options.key, &options.prefix);
    status.key = key.clone();

    if !store.is_available() {
        tracing::warn!("cache store unavailable ({:?}); passing through", store.state());
        return attach(next.run(ctx).await, status);
    }

    match bounded_get(&store, &key, options.timeout).await {
        Ok(Some(raw)) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(_) => {
                status.hit = true;
                tracing::debug!("cache hit for {key}");
                let mut response = Response::new(StatusCode::Ok)
                    .header("Content-Type", "application/json")
                    .body(raw);
                response.extensions_mut().insert(status);
                return response;
            }
            Err(e) => {
                // Corrupt entry: serve as a miss so the write-back replaces it.
                tracing::error!("cached payload under {key} is not valid JSON: {e}");
            }
        },
        Ok(None) => {
            tracing::debug!("cache miss for {key}");
        }
        Err(StoreError::Timeout(deadline)) => {
            tracing::warn!("cache read for {key} timed out after {deadline:?}; passing through");
            return attach(next.run(ctx).await, status);
        }
        Err(e) => {
            tracing::error!("cache read for {key} failed: {e}; passing through");
            return attach(next.run(ctx).await, status);
        }
    }

    // Miss: run the downstream chain, then write the body back without
    // delaying the response.
    let response = next.run(ctx).await;

    if response.status().is_success() && response.is_json() {
        // A hit replays the stored body as JSON verbatim, so only bodies that
        // actually parse are worth storing.
        match std::str::from_utf8(response.payload())
            .map_err(|e| e.to_string())
            .and_then(|body| {
                serde_json::from_str::<serde_json::Value>(body)
                    .map(|_| body)
                    .map_err(|e| e.to_string())
            }) {
            Ok(body) => {
                status.ttl = Some(options.ttl);
                spawn_write_back(store, key, body.to_owned(), options.ttl);
            }
            Err(e) => {
                tracing::warn!("response body for {key} declares JSON but does not parse: {e}");
            }
        }
    } else {
        tracing::debug!(
            "response for {key} not cacheable (status {}, json: {})",
            response.status(),
            response.is_json()
        );
    }

    attach(response, status)
}

/// Races the store read against a deadline.
///
/// The read runs as its own task: on timeout the `JoinHandle` is dropped,
/// which detaches rather than aborts it, so a slow store call completes in
/// the background and its result is discarded.
async fn bounded_get(
    store: &StoreHandle,
    key: &str,
    deadline: Duration,
) -> Result<Option<String>, StoreError> {
    let lookup = tokio::spawn({
        let store = store.clone();
        let key = key.to_owned();
        async move { store.get(&key).await }
    });

    match tokio::time::timeout(deadline, lookup).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(StoreError::Internal(join_error.to_string())),
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

// Write-back is fire-and-forget: errors are logged on the task's own channel
// and never joined.
fn spawn_write_back(store: StoreHandle, key: String, body: String, ttl: u64) {
    tokio::spawn(async move {
        match store.set_ex(&key, &body, ttl).await {
            Ok(()) => tracing::debug!("cached response under {key} for {ttl}s"),
            Err(e) => tracing::error!("cache write-back for {key} failed: {e}"),
        }
    });
}

fn attach(mut response: Response, status: CacheStatus) -> Response {
    response.extensions_mut().insert(status);
    response
}
