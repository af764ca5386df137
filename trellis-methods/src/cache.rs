//! Cache invocation adapter.
//!
//! Wraps a normalized method with:
//!
//! - **Single-flight**: one generation per key at a time; concurrent callers
//!   for a pending key wait for the same outcome.
//! - **Generation timeout**: every caller waiting on a generation gets
//!   [`MethodError::Timeout`] together once `generate_timeout` has elapsed
//!   since the generation started. The generation itself keeps running in the
//!   background and still stores its value. Callers that join it after the
//!   deadline start a fresh window.
//! - **Stale reads**: with `stale_in`/`stale_timeout`, an aging value triggers
//!   a refresh and is served while the refresh is slow.
//!
//! Failures are never stored and reach every caller waiting on the key.

use crate::error::{MethodError, MethodResult};
use crate::method::{Generated, Normalized};
use crate::options::{CachePolicy, GenerateTimeout, KeyGenerator};
use crate::store::{CacheError, CacheStore, Segment};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

type Waiter = oneshot::Sender<MethodResult>;

/// Callers waiting on one in-flight generation.
struct Pending {
    waiters: Vec<Waiter>,
    /// When the current waiters give up, `None` without a generate timeout.
    deadline: Option<Instant>,
}

/// Cache attached to one registered server method.
#[derive(Clone)]
pub struct MethodCache {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    method: Normalized,
    segment: Segment,
    policy: CachePolicy,
    timeout: GenerateTimeout,
    generate_key: KeyGenerator,
    pending: Mutex<HashMap<String, Pending>>,
    stats: Counters,
}

/// What gets written to the store for each key.
#[derive(Serialize, Deserialize)]
struct Envelope {
    item: Value,
    /// Lifetime the value was stored with, in milliseconds.
    ttl: u64,
}

struct Cached {
    value: Value,
    stale: bool,
}

impl MethodCache {
    pub(crate) fn new(
        method: Normalized,
        policy: CachePolicy,
        timeout: GenerateTimeout,
        generate_key: KeyGenerator,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let name = method.name().to_string();
        Self {
            inner: Arc::new(Inner {
                segment: Segment::new(store, &name),
                name,
                method,
                policy,
                timeout,
                generate_key,
                pending: Mutex::new(HashMap::new()),
                stats: Counters::default(),
            }),
        }
    }

    /// Invoke through the cache.
    pub async fn get(&self, args: Vec<Value>) -> MethodResult {
        let inner = &self.inner;
        let key = inner.key(&args)?;
        inner.stats.gets.fetch_add(1, Ordering::Relaxed);

        match inner.lookup(&key).await? {
            Some(cached) if !cached.stale => {
                inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!(method = %inner.name, key = %key, "Method cache hit");
                Ok(cached.value)
            }
            Some(cached) => {
                inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                inner.stats.stales.fetch_add(1, Ordering::Relaxed);
                trace!(method = %inner.name, key = %key, "Method cache stale, refreshing");
                let (rx, _) = Inner::join_or_generate(inner, key, args);
                // both stale options are validated to be set together
                let wait = inner.policy.stale_timeout.unwrap_or_default();
                match tokio::time::timeout(wait, rx).await {
                    Ok(outcome) => inner.received(outcome),
                    Err(_) => Ok(cached.value),
                }
            }
            None => {
                inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                trace!(method = %inner.name, key = %key, "Method cache miss");
                let (rx, deadline) = Inner::join_or_generate(inner, key, args);
                match (inner.timeout, deadline) {
                    (GenerateTimeout::After(limit), Some(deadline)) => {
                        match tokio::time::timeout_at(deadline, rx).await {
                            Ok(outcome) => inner.received(outcome),
                            Err(_) => {
                                inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    method = %inner.name,
                                    timeout = ?limit,
                                    "Method generation timed out"
                                );
                                Err(MethodError::Timeout {
                                    name: inner.name.clone(),
                                    timeout: limit,
                                })
                            }
                        }
                    }
                    _ => inner.received(rx.await),
                }
            }
        }
    }

    /// Invalidate the value stored for the key derived from `args`.
    pub async fn drop(&self, args: &[Value]) -> MethodResult<()> {
        let key = self.inner.key(args)?;
        self.inner.segment.delete(&key).await?;
        debug!(method = %self.inner.name, key = %key, "Method cache entry dropped");
        Ok(())
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.inner.policy
    }
}

impl Inner {
    fn key(&self, args: &[Value]) -> MethodResult<String> {
        match (self.generate_key)(args) {
            Some(key) if !key.is_empty() || args.is_empty() => Ok(key),
            _ => Err(MethodError::InvalidKey(self.name.clone())),
        }
    }

    async fn lookup(&self, key: &str) -> MethodResult<Option<Cached>> {
        let Some(raw) = self.segment.get(key).await? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_str(&raw)
            .map_err(|e| CacheError::Deserialization(e.to_string()))?;

        let stale = match self.policy.stale_in {
            Some(stale_in) => {
                let remaining = self.segment.ttl(key).await?.unwrap_or_default();
                let age = Duration::from_millis(envelope.ttl).saturating_sub(remaining);
                age >= stale_in
            }
            None => false,
        };

        Ok(Some(Cached {
            value: envelope.item,
            stale,
        }))
    }

    /// Register as a waiter for `key`, starting a generation if none is running.
    ///
    /// Returns the deadline shared by every caller currently waiting on the
    /// generation.
    fn join_or_generate(
        this: &Arc<Self>,
        key: String,
        args: Vec<Value>,
    ) -> (oneshot::Receiver<MethodResult>, Option<Instant>) {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let window = |current: Option<Instant>| match this.timeout {
            GenerateTimeout::After(limit) => {
                Some(current.filter(|deadline| *deadline > now).unwrap_or(now + limit))
            }
            GenerateTimeout::Disabled => None,
        };

        let deadline = {
            let mut pending = this.pending.lock();
            if let Some(entry) = pending.get_mut(&key) {
                entry.deadline = window(entry.deadline);
                entry.waiters.push(tx);
                return (rx, entry.deadline);
            }
            let deadline = window(None);
            pending.insert(
                key.clone(),
                Pending {
                    waiters: vec![tx],
                    deadline,
                },
            );
            deadline
        };

        this.stats.generates.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(this);
        tokio::spawn(async move { inner.generate(key, args).await });
        (rx, deadline)
    }

    async fn generate(&self, key: String, args: Vec<Value>) {
        let result = match self.method.run(args).await {
            Ok(generated) => {
                self.store(&key, &generated).await;
                Ok(generated.value)
            }
            Err(error) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                debug!(method = %self.name, key = %key, error = %error, "Method generation failed");
                if let Err(e) = self.segment.delete(&key).await {
                    warn!(method = %self.name, error = %e, "Failed to drop cache entry");
                }
                Err(error)
            }
        };

        let waiters = self
            .pending
            .lock()
            .remove(&key)
            .map(|pending| pending.waiters)
            .unwrap_or_default();
        for waiter in waiters {
            // waiters that already timed out have hung up
            let _ = waiter.send(result.clone());
        }
    }

    async fn store(&self, key: &str, generated: &Generated) {
        let Some(ttl) = generated.ttl.or(self.policy.expires_in) else {
            return;
        };
        if ttl.is_zero() {
            return;
        }

        let envelope = Envelope {
            item: generated.value.clone(),
            ttl: ttl.as_millis() as u64,
        };
        let stored = match serde_json::to_string(&envelope) {
            Ok(json) => self.segment.set(key, json, Some(ttl)).await,
            Err(e) => Err(CacheError::Serialization(e.to_string())),
        };
        match stored {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(method = %self.name, key = %key, error = %e, "Failed to store method result"),
        }
    }

    fn received(&self, outcome: Result<MethodResult, oneshot::error::RecvError>) -> MethodResult {
        outcome.unwrap_or_else(|_| Err(MethodError::NoResult(self.name.clone())))
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stales: AtomicU64,
    generates: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stales: self.stales.load(Ordering::Relaxed),
            generates: self.generates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Monotonic per-method cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls that reached the cache with a valid key.
    pub gets: u64,
    /// Values written to the store.
    pub sets: u64,
    /// Calls answered from a stored value (stale ones included).
    pub hits: u64,
    /// Calls that found nothing stored.
    pub misses: u64,
    /// Hits on values older than `stale_in`.
    pub stales: u64,
    /// Generations started.
    pub generates: u64,
    /// Generations that failed.
    pub errors: u64,
    /// Callers that gave up after `generate_timeout`.
    pub timeouts: u64,
}
