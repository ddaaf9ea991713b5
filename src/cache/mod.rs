//! Content-addressed cache of classification results.
//!
//! The cache is advisory. Whether the backing store is reachable is decided
//! once, at construction; after that a disabled cache answers every call
//! immediately, and a failing enabled one logs and reports a miss. Nothing
//! here returns an error to the caller.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;

use crate::{
    config::{CacheBackendKind, CacheConfig},
    domain::{ClassificationResult, ImageInput},
};

mod key;
mod store;

pub use key::CacheKey;
pub use store::{CacheBackend, MemoryStore, RedisStore};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cached payload is not a classification result: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub connected: bool,
    pub backend: Option<&'static str>,
    pub total_keys: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

pub struct ResultCache {
    backend: Option<CacheBackend>,
    namespace: String,
    ttl: Duration,
    op_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Builds the configured backend and pings it once. Any failure leaves
    /// the cache disabled for the life of the process.
    pub async fn connect(config: &CacheConfig) -> Self {
        let backend = match config.backend {
            CacheBackendKind::Disabled => {
                tracing::info!(target: "cache", "result cache disabled by configuration");
                None
            }
            CacheBackendKind::Memory => Some(CacheBackend::Memory(MemoryStore::new())),
            CacheBackendKind::Redis => {
                match bounded(config.op_timeout, RedisStore::connect(&config.redis_url)).await {
                    Ok(store) => Some(CacheBackend::Redis(store)),
                    Err(err) => {
                        tracing::warn!(
                            target: "cache",
                            error = %err,
                            "redis cache not available; continuing without cache"
                        );
                        None
                    }
                }
            }
        };

        let backend = match backend {
            Some(backend) => {
                let reachable = bounded(config.op_timeout, backend.ping()).await;
                match reachable {
                    Ok(()) => {
                        tracing::info!(target: "cache", backend = backend.kind(), "result cache connected");
                        Some(backend)
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "cache",
                            backend = backend.kind(),
                            error = %err,
                            "cache ping failed; continuing without cache"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Self::with_backend(backend, config)
    }

    pub fn with_backend(backend: Option<CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            namespace: config.namespace.clone(),
            ttl: config.ttl,
            op_timeout: config.op_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self, input: &ImageInput) -> CacheKey {
        CacheKey::for_content(&self.namespace, input.content())
    }

    pub async fn get(&self, key: &CacheKey) -> Option<ClassificationResult> {
        let backend = self.backend.as_ref()?;

        let lookup = async {
            let result = match backend.get(key.as_str()).await? {
                Some(payload) => Some(serde_json::from_str::<ClassificationResult>(&payload)?),
                None => None,
            };
            Ok::<_, CacheError>(result)
        };

        match bounded(self.op_timeout, lookup).await {
            Ok(Some(result)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::info!(target: "cache", key = key.short(), "cache hit");
                Some(result)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target: "cache", key = key.short(), "cache miss");
                None
            }
            Err(err) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::error!(target: "cache", key = key.short(), error = %err, "cache read failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &CacheKey, result: &ClassificationResult, ttl: Duration) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        let write = async {
            let payload = serde_json::to_string(result)?;
            backend.set(key.as_str(), payload, ttl).await
        };

        match bounded(self.op_timeout, write).await {
            Ok(()) => {
                tracing::info!(target: "cache", key = key.short(), ttl_secs = ttl.as_secs(), "cached result");
                true
            }
            Err(err) => {
                tracing::error!(target: "cache", key = key.short(), error = %err, "cache write failed");
                false
            }
        }
    }

    /// Removes every entry under this cache's namespace.
    pub async fn clear(&self) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        match bounded(self.op_timeout, backend.delete_prefix(&self.prefix())).await {
            Ok(deleted) => {
                tracing::info!(target: "cache", deleted, "cleared cached results");
                true
            }
            Err(err) => {
                tracing::error!(target: "cache", error = %err, "cache clear failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let hit_rate = hit_count as f64 / (hit_count + miss_count).max(1) as f64;

        let (connected, total_keys) = match self.backend.as_ref() {
            Some(backend) => {
                match bounded(self.op_timeout, backend.count_prefix(&self.prefix())).await {
                    Ok(total) => (true, total),
                    Err(err) => {
                        tracing::warn!(target: "cache", error = %err, "cache stats unavailable");
                        (false, 0)
                    }
                }
            }
            None => (false, 0),
        };

        CacheStats {
            enabled: self.is_enabled(),
            connected,
            backend: self.backend.as_ref().map(CacheBackend::kind),
            total_keys,
            hit_count,
            miss_count,
            hit_rate,
        }
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

async fn bounded<T>(limit: Duration, op: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
    timeout(limit, op)
        .await
        .map_err(|_| CacheError::Timeout(limit))?
}
