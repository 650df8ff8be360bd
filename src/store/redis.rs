//! Redis store backend.
//!
//! Wraps the `redis` crate's [`ConnectionManager`]: a multiplexed connection
//! that transparently reconnects after transient network loss. The manager is
//! `Clone`, so every operation works on a cheap clone and no lock guards an
//! `.await` point.
//!
//! The [`ConnectionState`] reported here follows observed behavior: the store
//! is `Connecting` while the initial handshake runs, `Ready` after any
//! successful operation, and `Reconnecting` after a connection-shaped failure
//! (the manager retries underneath). `close` drops to `Disconnected`; the
//! connection itself is torn down when the last clone is dropped.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{ConnectionState, StateCell, Store, StoreError};

/// [`Store`] implementation over a Redis-compatible server.
pub struct RedisStore {
    conn: ConnectionManager,
    state: StateCell,
}

impl RedisStore {
    /// Connects to the server at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is malformed or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let state = StateCell::new(ConnectionState::Connecting);
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        state.set(ConnectionState::Ready);
        Ok(Self { conn, state })
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.state.get().is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    // Folds an operation result into the state machine: success re-arms
    // `Ready`, a connection-shaped failure marks `Reconnecting` while the
    // manager retries underneath.
    fn track<T>(&self, result: redis::RedisResult<T>) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                self.state.set(ConnectionState::Ready);
                Ok(value)
            }
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.state.set(ConnectionState::Reconnecting);
                }
                Err(StoreError::Backend(e))
            }
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<String>> = conn.get(key).await;
        self.track(result)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.check_available()?;
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.set_ex(key, value, ttl_seconds).await;
        self.track(result)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check_available()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<u64> = conn.del(keys).await;
        self.track(result)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Vec<String>> = conn.keys(pattern).await;
        self.track(result)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()?;
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.track(result).map(|_| ())
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn close(&self) {
        self.state.set(ConnectionState::Disconnected);
    }
}
