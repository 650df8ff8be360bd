//! # readthru
//!
//! Request-scoped response caching for async HTTP middleware pipelines,
//! layered in front of a Redis-shaped key-value store.
//!
//! Two middlewares do all the work: [`cache::CacheMiddleware`] serves cached
//! responses for safe requests and populates the store on miss (read-through);
//! [`cache::InvalidateMiddleware`] deletes entries when mutating requests
//! occur. Both are fail-open — a slow, unreachable, or erroring store never
//! fails a request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use readthru::cache::{CacheMiddleware, CacheOptions};
//! use readthru::context::Context;
//! use readthru::http::{Method, Request, Response, StatusCode};
//! use readthru::middleware::{Next, from_handler, from_middleware};
//! use readthru::store::StoreHandle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = StoreHandle::connect("redis://127.0.0.1:6379").await?;
//!
//!     let chain = vec![
//!         from_middleware(Arc::new(CacheMiddleware::new(
//!             store.clone(),
//!             CacheOptions::default().ttl(120),
//!         ))),
//!         from_handler(|_ctx| async {
//!             Response::json(StatusCode::Ok, &serde_json::json!({"users": []}))
//!         }),
//!     ];
//!
//!     let request = Request::new(Method::Get, "/api/users?page=1");
//!     let response = Next::new(chain).run(Context::new(request)).await;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheMiddleware, CacheOptions, CacheStatus, InvalidateMiddleware, InvalidateOptions};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use store::{StoreError, StoreHandle};
