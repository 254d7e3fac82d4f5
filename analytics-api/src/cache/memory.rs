//! In-process cache store backed by `moka`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::{CacheStore, Result};

#[derive(Clone)]
struct Entry {
    payload: String,
    ttl: Duration,
}

/// Expire each entry after the TTL it was written with
struct WriteTtl;

impl Expiry<String, Entry> for WriteTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-memory cache. Entries are evicted by TTL or, when full, by moka's own policy.
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Cache<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_capacity).expire_after(WriteTtl).build(),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|entry| entry.payload))
    }

    async fn set_ex(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        self.entries
            .insert(
                key.to_string(),
                Entry {
                    payload: payload.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }
}
