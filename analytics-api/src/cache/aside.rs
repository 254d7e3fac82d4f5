use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{CacheError, CacheKey, CacheStore};

const LOOKUPS_METRIC: &str = "analytics_cache_lookups_total";
const WRITE_FAILURES_METRIC: &str = "analytics_cache_write_failures_total";

/// Typed read-through access to a [`CacheStore`].
///
/// Nothing here returns an error. A cache that is down or holds a payload that no longer decodes
/// only costs a trip to the warehouse.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Fetch and decode the entry under `key`. `None` on miss, backend fault or bad payload.
    pub async fn lookup<T: DeserializeOwned>(&self, resource: &'static str, key: &CacheKey) -> Option<T> {
        let key = key.to_string();
        let outcome = match self.store.get(&key).await {
            Ok(Some(payload)) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    debug!(%key, "Cache hit");
                    counter!(LOOKUPS_METRIC, "resource" => resource, "outcome" => "hit").increment(1);
                    return Some(value);
                }
                Err(e) => {
                    warn!(%key, error = %e, "Discarding undecodable cache entry");
                    "error"
                }
            },
            Ok(None) => {
                debug!(%key, "Cache miss");
                "miss"
            }
            Err(e) => {
                warn!(%key, error = %e, "Cache lookup failed; querying warehouse directly");
                "error"
            }
        };
        counter!(LOOKUPS_METRIC, "resource" => resource, "outcome" => outcome).increment(1);
        None
    }

    /// Serialize `value` and write it under `key` with the configured TTL. Failures are logged.
    pub async fn store<T: Serialize>(&self, resource: &'static str, key: &CacheKey, value: &T) {
        let key = key.to_string();
        let payload = match serde_json::to_string(value).map_err(CacheError::from) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%key, error = %e, "Failed to serialize result for caching");
                counter!(WRITE_FAILURES_METRIC, "resource" => resource).increment(1);
                return;
            }
        };

        if let Err(e) = self.store.set_ex(&key, &payload, self.ttl).await {
            warn!(%key, error = %e, "Failed to write cache entry");
            counter!(WRITE_FAILURES_METRIC, "resource" => resource).increment(1);
        }
    }
}
