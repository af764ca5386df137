//! Cache store backing method caching.
//!
//! Values are stored as JSON strings with an optional time-to-live. The
//! registry owns one store and gives every cached method its own key
//! namespace inside it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Result type for cache store operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache store errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Backend failure
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Storage backend for cached method results.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a JSON value, `None` when missing or expired.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a JSON value. `None` ttl means it never expires.
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check if a live entry exists.
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.get_json(key).await.map(|v| v.is_some())
    }

    /// Remaining time-to-live of a key, `None` if missing or without expiry.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Remove every key.
    async fn clear(&self) -> CacheResult<()>;
}

/// Entry count below which writes never sweep.
const MIN_SWEEP: usize = 64;

/// In-memory store used by default.
///
/// Expired entries are removed when read, and writes sweep the whole map
/// once it has doubled in size since the last sweep.
pub struct InMemoryCache {
    data: Arc<RwLock<HashMap<String, Entry>>>,
    sweep_at: AtomicUsize,
}

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<tokio::time::Instant>,
}

impl Entry {
    fn is_live(&self, now: tokio::time::Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl InMemoryCache {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            sweep_at: AtomicUsize::new(MIN_SWEEP),
        }
    }

    /// Number of stored entries, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn evict_expired(&self) {
        let mut data = self.data.write().await;
        self.sweep(&mut data);
    }

    fn sweep(&self, data: &mut HashMap<String, Entry>) {
        let now = tokio::time::Instant::now();
        data.retain(|_, entry| entry.is_live(now));
        self.sweep_at
            .store((data.len() * 2).max(MIN_SWEEP), Ordering::Relaxed);
    }

    /// Remove `key` if it is still expired once the write lock is held.
    async fn remove_expired(&self, key: &str) {
        let mut data = self.data.write().await;
        if data
            .get(key)
            .is_some_and(|entry| !entry.is_live(tokio::time::Instant::now()))
        {
            data.remove(key);
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        {
            let data = self.data.read().await;
            match data.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(tokio::time::Instant::now()) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }
        self.remove_expired(key).await;
        Ok(None)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|d| tokio::time::Instant::now() + d);
        let mut data = self.data.write().await;
        if data.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep(&mut data);
        }
        data.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = tokio::time::Instant::now();
        let expires_at = match self.data.read().await.get(key) {
            Some(entry) => entry.expires_at,
            None => return Ok(None),
        };
        match expires_at {
            Some(exp) if exp > now => Ok(Some(exp - now)),
            Some(_) => {
                self.remove_expired(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }
}

/// A view of a store that prefixes every key with a segment name.
#[derive(Clone)]
pub struct Segment {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl Segment {
    /// Create a segment over `store`.
    pub fn new(store: Arc<dyn CacheStore>, name: &str) -> Self {
        Self {
            store,
            prefix: format!("#{}", name),
        }
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.store.get_json(&self.build_key(key)).await
    }

    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        self.store.set_json(&self.build_key(key), value, ttl).await
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.store.ttl(&self.build_key(key)).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.store.delete(&self.build_key(key)).await
    }
}
