//! Middleware pipeline — composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware
//! stack. Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses (a cache hit never reaches the handler), and
//! response decoration without coupling handlers to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`]
//!   to advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] — converts a [`Middleware`] trait object into a
//!   [`MiddlewareHandler`].
//! - [`from_handler`] — wraps a terminal async handler as the last chain entry.
//! - [`LoggerMiddleware`] — built-in request/response logger, cache-aware.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Response, cache::CacheStatus, context::Context};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the
/// next middleware (or returns a fallback `500` response when the chain is
/// exhausted without any middleware generating a response).
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be
/// called more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use readthru::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
///
/// Construct one with [`from_middleware`], [`from_handler`], or by wrapping a
/// closure directly:
///
/// ```rust,no_run
/// use std::{pin::Pin, sync::Arc};
/// use readthru::{Response, context::Context, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use readthru::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(Arc::new(LoggerMiddleware));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps a terminal async handler as a [`MiddlewareHandler`].
///
/// The handler ignores the rest of the chain, so it belongs at the end of the
/// stack — the application endpoint the caching middlewares sit in front of.
///
/// # Examples
///
/// ```rust,no_run
/// use readthru::{Response, StatusCode, middleware::from_handler};
///
/// let handler = from_handler(|_ctx| async {
///     Response::json(StatusCode::Ok, &serde_json::json!({"ok": true}))
/// });
/// ```
pub fn from_handler<F, Fut>(handler: F) -> MiddlewareHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: Context, _next: Next| Box::pin(handler(ctx)))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use readthru::middleware::Next;
    ///
    /// let next = Next::new(vec![]);
    /// ```
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// Advances the internal cursor by one, clones the handler at the current
    /// position, and awaits it. If no handler remains (i.e. the chain is
    /// exhausted without producing a response), a `500 Internal Server Error`
    /// response is returned as a safe fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(crate::StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all readthru middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`
///   (this is how a cache hit skips the downstream handler).
/// - **Decorate** — call `next.run(ctx).await`, inspect the response, and
///   return a modified copy.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared
///   across Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future so it can be awaited
///   across `.await` points in multi-threaded runtimes.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Built-in middleware that logs each request's method, path, status, and
/// duration, plus the cache outcome when the read-through middleware ran.
///
/// Emits a single `tracing::info!` line after the downstream chain completes:
///
/// ```text
/// METHOD /path - STATUS (duration) [cache HIT key]
/// ```
///
/// `LoggerMiddleware` does not short-circuit; it always delegates to the next
/// middleware and decorates the response timing after the fact. Place it
/// *before* the cache middleware so hits are logged too.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().full_path();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();

            match response.extensions().get::<CacheStatus>() {
                Some(cache) if cache.hit => {
                    tracing::info!(
                        "{} {} - {} ({:?}) [cache HIT {}]",
                        method,
                        path,
                        status,
                        duration,
                        cache.key
                    );
                }
                Some(cache) => {
                    tracing::info!(
                        "{} {} - {} ({:?}) [cache MISS {}]",
                        method,
                        path,
                        status,
                        duration,
                        cache.key
                    );
                }
                None => {
                    tracing::info!("{} {} - {} ({:?})", method, path, status, duration);
                }
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Request, StatusCode};

    #[tokio::test]
    async fn exhausted_chain_falls_back_to_500() {
        let next = Next::new(vec![]);
        let response = next.run(Context::new(Request::new(Method::Get, "/"))).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn handler_terminates_chain() {
        let chain = vec![from_handler(|_ctx| async {
            Response::new(StatusCode::Ok).body("done")
        })];
        let response = Next::new(chain)
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.payload(), b"done");
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let chain = vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            from_handler(|_ctx| async { Response::new(StatusCode::Ok).body("ok") }),
        ];
        let response = Next::new(chain)
            .run(Context::new(Request::new(Method::Get, "/health")))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.payload(), b"ok");
    }

    #[tokio::test]
    async fn middleware_runs_in_order() {
        struct Tag(&'static str);

        impl Middleware for Tag {
            fn handle(
                &self,
                ctx: Context,
                next: Next,
            ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let tag = self.0;
                Box::pin(async move {
                    let mut response = next.run(ctx).await;
                    response.add_header("X-Tag", tag);
                    response
                })
            }
        }

        let chain = vec![
            from_middleware(Arc::new(Tag("outer"))),
            from_middleware(Arc::new(Tag("inner"))),
            from_handler(|_ctx| async { Response::new(StatusCode::Ok) }),
        ];
        let response = Next::new(chain)
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;

        // Decoration happens on the way back out: inner first, outer last.
        let tags: Vec<_> = response.headers().get_all("x-tag").collect();
        assert_eq!(tags, vec!["inner", "outer"]);
    }
}
