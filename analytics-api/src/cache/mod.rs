//! Cache-aside layer for query results.
//!
//! The layer is split in two:
//!
//! - [`CacheStore`] is the raw collaborator: string payloads in, string payloads out, with a
//!   time-to-live on write. Backends are Redis ([`RedisCacheStore`]) for shared deployments,
//!   an in-process `moka` cache ([`MemoryCacheStore`]) for single nodes and tests, and
//!   [`NoopCacheStore`] when caching is switched off.
//! - [`CacheAside`] is what handlers use. It builds on a store, owns the TTL, serializes typed
//!   payloads, and never fails the request: backend faults and undecodable payloads are logged
//!   and treated as misses (on read) or dropped (on write).
//!
//! Keys are built with [`CacheKey`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod aside;
mod key;
mod memory;
mod redis;

pub use aside::CacheAside;
pub use key::CacheKey;
pub use memory::MemoryCacheStore;
pub use redis::RedisCacheStore;

use crate::config::CacheBackend;

/// Errors raised by cache backends
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend unreachable, or a command failed
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be encoded or decoded
    #[error("cache payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Result type for cache backend operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// A key/value store with per-entry expiry.
///
/// Absence is not an error: `get` returns `Ok(None)` for missing or expired keys.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;
}

/// Store used when caching is disabled: every lookup misses, every write is discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheStore;

#[async_trait]
impl CacheStore for NoopCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_ex(&self, _key: &str, _payload: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }
}

/// Create a cache store from configuration
///
/// This is the single point where cache config turns into a backend instance.
pub fn create_store(backend: &CacheBackend) -> Result<Arc<dyn CacheStore>> {
    Ok(match backend {
        CacheBackend::Redis { url, key_prefix } => Arc::new(RedisCacheStore::new(url, key_prefix.clone())?),
        CacheBackend::Memory { max_capacity } => Arc::new(MemoryCacheStore::new(*max_capacity)),
        CacheBackend::Disabled => Arc::new(NoopCacheStore),
    })
}
