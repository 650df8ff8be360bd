//! End-to-end pipeline tests for the read-through and invalidation
//! middlewares against the in-process store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use readthru::cache::{
    CacheMiddleware, CacheOptions, CacheStatus, InvalidateMiddleware, InvalidateOptions, KeySpec,
};
use readthru::context::Context;
use readthru::http::{Method, Request, Response, StatusCode};
use readthru::middleware::{MiddlewareHandler, Next, from_handler, from_middleware};
use readthru::store::{ConnectionState, MemoryStore, Store, StoreError, StoreHandle};

/// Counts handler invocations so tests can prove a hit short-circuited the
/// chain (or that a pass-through did not).
fn counting_handler(hits: Arc<AtomicUsize>) -> MiddlewareHandler {
    from_handler(move |_ctx| {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Response::json(StatusCode::Ok, &serde_json::json!({"a": 1}))
        }
    })
}

async fn send(chain: Vec<MiddlewareHandler>, request: Request) -> Response {
    init_logging();
    Next::new(chain).run(Context::new(request)).await
}

/// Routes middleware tracing through the test harness; `RUST_LOG` controls
/// verbosity. Idempotent across tests sharing a process.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lets detached write-back tasks run to completion on the current-thread
/// test runtime.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn miss_then_hit_round_trip() {
    let store = StoreHandle::memory();
    let handled = Arc::new(AtomicUsize::new(0));
    let middleware = Arc::new(CacheMiddleware::new(store.clone(), CacheOptions::default()));

    let first = send(
        vec![
            from_middleware(middleware.clone()),
            counting_handler(handled.clone()),
        ],
        Request::new(Method::Get, "/api/users?x=1"),
    )
    .await;

    assert_eq!(first.status(), StatusCode::Ok);
    let status = first.extensions().get::<CacheStatus>().unwrap();
    assert!(!status.hit);
    assert_eq!(status.key, "cache:GET:/api/users?x=1");
    assert_eq!(status.ttl, Some(60));

    settle().await;
    // The write-back landed in the store under the derived key.
    let stored = store.get("cache:GET:/api/users?x=1").await.unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&stored.unwrap()).unwrap(),
        serde_json::json!({"a": 1})
    );

    let second = send(
        vec![
            from_middleware(middleware),
            counting_handler(handled.clone()),
        ],
        Request::new(Method::Get, "/api/users?x=1"),
    )
    .await;

    assert_eq!(second.status(), StatusCode::Ok);
    assert_eq!(second.payload(), first.payload());
    let status = second.extensions().get::<CacheStatus>().unwrap();
    assert!(status.hit);
    assert_eq!(status.key, "cache:GET:/api/users?x=1");
    // The downstream handler ran exactly once: the hit short-circuited.
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_2xx_responses_are_never_cached() {
    let store = StoreHandle::memory();
    let chain = vec![
        from_middleware(Arc::new(CacheMiddleware::new(
            store.clone(),
            CacheOptions::default(),
        ))),
        from_handler(|_ctx| async {
            Response::json(StatusCode::NotFound, &serde_json::json!({"error": "missing"}))
        }),
    ];

    let response = send(chain, Request::new(Method::Get, "/api/nothing")).await;
    assert_eq!(response.status(), StatusCode::NotFound);

    settle().await;
    assert_eq!(store.get("cache:GET:/api/nothing").await.unwrap(), None);
}

#[tokio::test]
async fn non_json_bodies_are_never_cached() {
    let store = StoreHandle::memory();
    let chain = vec![
        from_middleware(Arc::new(CacheMiddleware::new(
            store.clone(),
            CacheOptions::default(),
        ))),
        from_handler(|_ctx| async { Response::new(StatusCode::Ok).body("plain text") }),
    ];

    let response = send(chain, Request::new(Method::Get, "/api/text")).await;
    assert_eq!(response.status(), StatusCode::Ok);

    settle().await;
    assert_eq!(store.get("cache:GET:/api/text").await.unwrap(), None);
}

#[tokio::test]
async fn mislabeled_json_body_is_never_cached() {
    let store = StoreHandle::memory();
    let handled = Arc::new(AtomicUsize::new(0));
    let middleware = Arc::new(CacheMiddleware::new(store.clone(), CacheOptions::default()));

    // Handler claims JSON but the body does not parse as it.
    let broken_handler = || {
        from_handler(|_ctx| async {
            Response::new(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body("not json at all")
        })
    };

    let first = send(
        vec![from_middleware(middleware.clone()), broken_handler()],
        Request::new(Method::Get, "/api/broken"),
    )
    .await;

    assert_eq!(first.status(), StatusCode::Ok);
    let status = first.extensions().get::<CacheStatus>().unwrap();
    assert!(!status.hit);
    // No write-back was scheduled for the unparseable body.
    assert_eq!(status.ttl, None);

    settle().await;
    assert_eq!(store.get("cache:GET:/api/broken").await.unwrap(), None);

    let second = send(
        vec![
            from_middleware(middleware),
            counting_handler(handled.clone()),
        ],
        Request::new(Method::Get, "/api/broken"),
    )
    .await;

    // Still a miss, so the downstream handler ran.
    assert_eq!(second.status(), StatusCode::Ok);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

/// Wraps the memory store and counts reads, so bypass paths can prove that
/// no store I/O happened at all.
struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.inner.set_ex(key, value, ttl_seconds).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.inner.del(keys).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(pattern).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[tokio::test]
async fn mutating_methods_bypass_the_cache_entirely() {
    let counting = Arc::new(CountingStore::new());
    let store = StoreHandle::new(counting.clone());
    let handled = Arc::new(AtomicUsize::new(0));

    for method in [Method::Post, Method::Put, Method::Delete, Method::Patch] {
        let chain = vec![
            from_middleware(Arc::new(CacheMiddleware::new(
                store.clone(),
                CacheOptions::default(),
            ))),
            counting_handler(handled.clone()),
        ];
        let response = send(chain, Request::new(method, "/api/users")).await;
        assert_eq!(response.status(), StatusCode::Ok);
    }

    settle().await;
    assert_eq!(handled.load(Ordering::SeqCst), 4);
    // Not a single store read, and nothing written either.
    assert_eq!(counting.gets.load(Ordering::SeqCst), 0);
    assert!(store.keys("*").await.unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_store_fails_open() {
    let store = StoreHandle::memory();
    store.close();
    let handled = Arc::new(AtomicUsize::new(0));

    let chain = vec![
        from_middleware(Arc::new(CacheMiddleware::new(
            store,
            CacheOptions::default(),
        ))),
        counting_handler(handled.clone()),
    ];
    let response = send(chain, Request::new(Method::Get, "/api/users")).await;

    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    let status = response.extensions().get::<CacheStatus>().unwrap();
    assert!(!status.hit);
    assert_eq!(status.key, "cache:GET:/api/users");
}

/// A store whose reads never resolve, for timeout behavior.
struct StallStore;

#[async_trait]
impl Store for StallStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        std::future::pending().await
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), StoreError> {
        Ok(())
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Ready
    }

    fn close(&self) {}
}

#[tokio::test(start_paused = true)]
async fn stalled_read_times_out_and_passes_through() {
    let store = StoreHandle::new(Arc::new(StallStore));
    let handled = Arc::new(AtomicUsize::new(0));

    let chain = vec![
        from_middleware(Arc::new(CacheMiddleware::new(
            store,
            CacheOptions::default().timeout(Duration::from_millis(100)),
        ))),
        counting_handler(handled.clone()),
    ];

    let start = tokio::time::Instant::now();
    let response = send(chain, Request::new(Method::Get, "/api/slow")).await;

    // Identical to a miss, and bounded by the configured deadline.
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_secs(1));
    let status = response.extensions().get::<CacheStatus>().unwrap();
    assert!(!status.hit);
}

#[tokio::test]
async fn invalidate_by_derived_key_then_continue() {
    let store = StoreHandle::memory();
    store
        .set_ex("cache:GET:/api/users", r#"{"stale":true}"#, 60)
        .await
        .unwrap();
    let handled = Arc::new(AtomicUsize::new(0));

    let options = InvalidateOptions::key(KeySpec::derived(|req| format!("GET:{}", req.path())));
    let chain = vec![
        from_middleware(Arc::new(InvalidateMiddleware::new(store.clone(), options))),
        counting_handler(handled.clone()),
    ];
    let response = send(chain, Request::new(Method::Post, "/api/users")).await;

    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("cache:GET:/api/users").await.unwrap(), None);
}

#[tokio::test]
async fn invalidate_by_pattern_spares_unrelated_keys() {
    let store = StoreHandle::memory();
    store.set_ex("cache:GET:/users?a=1", "{}", 60).await.unwrap();
    store.set_ex("cache:GET:/users?a=2", "{}", 60).await.unwrap();
    store.set_ex("cache:GET:/orders", "{}", 60).await.unwrap();
    let handled = Arc::new(AtomicUsize::new(0));

    let chain = vec![
        from_middleware(Arc::new(InvalidateMiddleware::new(
            store.clone(),
            InvalidateOptions::pattern("cache:GET:/users*"),
        ))),
        counting_handler(handled.clone()),
    ];
    send(chain, Request::new(Method::Post, "/users")).await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(store.keys("cache:GET:/users*").await.unwrap().is_empty());
    assert_eq!(
        store.get("cache:GET:/orders").await.unwrap().as_deref(),
        Some("{}")
    );
}

#[tokio::test]
async fn invalidate_by_key_list_prefixes_each_body() {
    let store = StoreHandle::memory();
    store.set_ex("cache:users-index", "{}", 60).await.unwrap();
    store.set_ex("cache:users-count", "{}", 60).await.unwrap();
    let handled = Arc::new(AtomicUsize::new(0));

    let chain = vec![
        from_middleware(Arc::new(InvalidateMiddleware::new(
            store.clone(),
            InvalidateOptions::keys(["users-index", "users-count"]),
        ))),
        counting_handler(handled.clone()),
    ];
    send(chain, Request::new(Method::Delete, "/users/7")).await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("cache:users-index").await.unwrap(), None);
    assert_eq!(store.get("cache:users-count").await.unwrap(), None);
}

#[tokio::test]
async fn invalidation_failure_never_blocks_the_request() {
    let store = StoreHandle::memory();
    store.close();
    let handled = Arc::new(AtomicUsize::new(0));

    let chain = vec![
        from_middleware(Arc::new(InvalidateMiddleware::new(
            store,
            InvalidateOptions::pattern("*"),
        ))),
        counting_handler(handled.clone()),
    ];
    let response = send(chain, Request::new(Method::Post, "/users")).await;

    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hit_expires_back_to_miss_after_ttl() {
    let store = StoreHandle::memory();
    let handled = Arc::new(AtomicUsize::new(0));
    let middleware = Arc::new(CacheMiddleware::new(
        store.clone(),
        CacheOptions::default().ttl(30),
    ));

    send(
        vec![
            from_middleware(middleware.clone()),
            counting_handler(handled.clone()),
        ],
        Request::new(Method::Get, "/api/users"),
    )
    .await;
    settle().await;
    assert_eq!(handled.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;

    send(
        vec![
            from_middleware(middleware),
            counting_handler(handled.clone()),
        ],
        Request::new(Method::Get, "/api/users"),
    )
    .await;
    settle().await;
    // Entry expired, so the handler ran again.
    assert_eq!(handled.load(Ordering::SeqCst), 2);
}
