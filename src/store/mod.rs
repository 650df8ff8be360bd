//! Key-value store seam — the external cache backend behind the middlewares.
//!
//! The caching layer talks to its backend through the [`Store`] trait: a small
//! operation set (get, set-with-expiry, delete, glob key scan, ping) that any
//! Redis-shaped store satisfies. Two implementations ship with the crate:
//!
//! - [`redis::RedisStore`] — production backend over an auto-reconnecting
//!   multiplexed connection.
//! - [`memory::MemoryStore`] — in-process backend with the same semantics,
//!   used in tests and single-node deployments.
//!
//! [`StoreHandle`] is the cheap-clone wrapper injected into each middleware
//! constructor. The optional process-wide singleton lives in [`registry`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors produced by store operations.
///
/// Middleware recovers all of these locally (fail-open); only the
/// programmatic invalidation and health APIs surface them to callers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The handle exists but is not in an available state, or no handle exists.
    #[error("store is not connected")]
    Unavailable,

    /// A bounded-time operation exceeded its deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend reported an error (network, protocol, or server-side).
    #[error("store backend error: {0}")]
    Backend(#[from] ::redis::RedisError),

    /// The task running the operation failed to complete.
    #[error("store operation task failed: {0}")]
    Internal(String),
}

/// Connection lifecycle of a store handle.
///
/// `Disconnected → Connecting → Ready` on startup; `Ready → Reconnecting →
/// Ready` across transient network loss; any state drops to `Disconnected`
/// on fatal error or explicit close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Reconnecting,
}

impl ConnectionState {
    /// Whether the interceptors should attempt I/O against the handle.
    ///
    /// `Connecting` counts as available: a request may race a handle that is
    /// not yet open rather than miss the cache warm-up window.
    pub fn is_available(self) -> bool {
        matches!(self, Self::Ready | Self::Connecting)
    }
}

// Lock-free connection-state flag shared between a store and its clones.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            x if x == ConnectionState::Connecting as u8 => ConnectionState::Connecting,
            x if x == ConnectionState::Ready as u8 => ConnectionState::Ready,
            x if x == ConnectionState::Reconnecting as u8 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Operation set every cache backend must provide.
///
/// Semantics:
/// - `get` of an absent key is `Ok(None)`, never an error.
/// - `set_ex` stores a UTF-8 value with a relative expiry in seconds.
/// - `del` is idempotent and returns how many keys actually existed.
/// - `keys` matches the store's glob syntax (`*` any sequence, `?` one char).
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value; `Ok(None)` means no entry.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value with a time-to-live in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Delete the given keys in one batch; returns the number deleted.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Return all keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Round-trip liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Gracefully stop the backend; subsequent operations fail `Unavailable`.
    fn close(&self);
}

/// Result of a [`StoreHandle::health_check`].
#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    /// The store answered a PING; `latency` is the measured round trip.
    Connected { latency: Duration },
    /// No usable connection — the handle is absent or not available.
    Disconnected,
    /// The store is nominally available but the PING failed.
    Error { message: String },
}

/// Cheap-clone, shareable handle to a cache backend.
///
/// Construct one per process (or per backend) and pass clones into each
/// middleware constructor. All methods delegate to the underlying [`Store`].
///
/// # Examples
///
/// ```
/// use readthru::store::StoreHandle;
///
/// let store = StoreHandle::memory();
/// assert!(store.is_available());
/// ```
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn Store>,
}

impl StoreHandle {
    /// Wraps an arbitrary [`Store`] implementation.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates a handle backed by an in-process [`MemoryStore`].
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Connects to a Redis-compatible store at `url`
    /// (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is invalid or the initial
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = RedisStore::connect(url).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Current connection state of the underlying store.
    pub fn state(&self) -> ConnectionState {
        self.store.state()
    }

    /// Whether the interceptors may attempt I/O right now.
    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Read a value; `Ok(None)` means no entry.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.get(key).await
    }

    /// Write a value with a time-to-live in seconds.
    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.store.set_ex(key, value, ttl_seconds).await
    }

    /// Delete the given keys in one batch; returns the number deleted.
    pub async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.store.del(keys).await
    }

    /// Return all keys matching a glob pattern.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.store.keys(pattern).await
    }

    /// Round-trip liveness probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Probes the store with a timed PING.
    ///
    /// Never errors: an unavailable handle reports [`Health::Disconnected`]
    /// and a failed probe reports [`Health::Error`] with the backend message.
    pub async fn health_check(&self) -> Health {
        if !self.is_available() {
            return Health::Disconnected;
        }
        let start = Instant::now();
        match self.ping().await {
            Ok(()) => Health::Connected {
                latency: start.elapsed(),
            },
            Err(e) => Health::Error {
                message: e.to_string(),
            },
        }
    }

    /// Gracefully stops the backend; subsequent operations fail `Unavailable`.
    pub fn close(&self) {
        self.store.close();
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Optional process-wide store singleton.
///
/// The handle is normally an explicitly injected dependency; this registry
/// exists for hosts that want the classic "create on first use, reuse while
/// connected" lifecycle. The async mutex is held across construction, so two
/// concurrent [`get_or_connect`] calls can never open two connections — at
/// most one live handle per process.
pub mod registry {
    use tokio::sync::Mutex;

    use super::{StoreError, StoreHandle};

    static HANDLE: Mutex<Option<StoreHandle>> = Mutex::const_new(None);

    /// Returns the existing handle if one is available, otherwise connects to
    /// `url` and installs the new handle.
    pub async fn get_or_connect(url: &str) -> Result<StoreHandle, StoreError> {
        let mut guard = HANDLE.lock().await;
        if let Some(handle) = guard.as_ref() {
            if handle.is_available() {
                return Ok(handle.clone());
            }
        }
        let handle = StoreHandle::connect(url).await?;
        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Installs `handle` unless an available handle already exists; returns
    /// the handle that is now current. Idempotent.
    pub async fn install(handle: StoreHandle) -> StoreHandle {
        let mut guard = HANDLE.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.is_available() {
                return existing.clone();
            }
        }
        *guard = Some(handle.clone());
        handle
    }

    /// Returns the current handle, if any.
    pub async fn current() -> Option<StoreHandle> {
        HANDLE.lock().await.clone()
    }

    /// Closes and clears the singleton. Safe to call when none exists.
    pub async fn close() {
        let mut guard = HANDLE.lock().await;
        if let Some(handle) = guard.take() {
            handle.close();
        }
    }
}
