//! In-process store backend with per-entry expiry.
//!
//! Mirrors the Redis-shaped [`Store`] contract closely enough that tests and
//! single-node deployments can run without an external store: relative
//! expiries, idempotent deletes, and glob key matching (`*`, `?`).
//!
//! Expired entries are dropped lazily on access; there is no background
//! sweeper.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use super::{ConnectionState, StateCell, Store, StoreError};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-memory [`Store`] implementation.
///
/// Uses tokio's clock, so tests with a paused runtime can advance time to
/// exercise expiry. A closed store reports `Disconnected` and fails every
/// operation with [`StoreError::Unavailable`], which makes the middlewares'
/// fail-open paths testable without a real network partition.
///
/// # Examples
///
/// ```
/// use readthru::store::{MemoryStore, Store};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// store.set_ex("cache:GET:/users", r#"[]"#, 60).await.unwrap();
/// assert_eq!(store.get("cache:GET:/users").await.unwrap().as_deref(), Some("[]"));
/// # });
/// ```
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    state: StateCell,
}

impl MemoryStore {
    /// Creates an empty store in the `Ready` state.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            state: StateCell::new(ConnectionState::Ready),
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.state.get().is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // Entry values are plain data; a poisoned lock cannot leave them
        // in a torn state, so recover the guard.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.check_available()?;
        let entry = Entry {
            value: value.to_owned(),
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        };
        self.lock().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.lock();
        let mut deleted = 0u64;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                // An expired entry no longer counts as present.
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.lock();
        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn close(&self) {
        self.state.set(ConnectionState::Disconnected);
        self.lock().clear();
    }
}

/// Glob matcher with Redis-style `*` (any sequence) and `?` (one character).
///
/// Classic two-pointer backtracking over bytes; patterns and keys are treated
/// as opaque byte strings, so multi-byte UTF-8 keys still match `*` correctly.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(star_pos) = star {
            // Backtrack: let the last `*` swallow one more byte.
            pi = star_pos + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}
