//! Redis-backed cache store.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{CacheError, CacheStore, Result};

/// Cache store over a single multiplexed Redis connection.
///
/// The connection is opened on first use rather than at construction, so the service can start
/// while Redis is down. If opening fails, or an established connection drops, the next call
/// tries again.
pub struct RedisCacheStore {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
}

impl RedisCacheStore {
    /// Parse the URL without connecting
    pub fn new(url: &str, key_prefix: String) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Unavailable(format!("Redis client error: {e}")))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            key_prefix,
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Opening Redis connection");
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis connection error: {e}")))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the shared connection when it is no longer usable
    async fn discard_if_broken(&self, err: &redis::RedisError) {
        if err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal() {
            *self.conn.lock().await = None;
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(self.prefixed_key(key)).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.discard_if_broken(&e).await;
                Err(CacheError::Unavailable(format!("Redis GET error: {e}")))
            }
        }
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()), err)]
    async fn set_ex(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        match conn.set_ex::<_, _, ()>(self.prefixed_key(key), payload, seconds).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard_if_broken(&e).await;
                Err(CacheError::Unavailable(format!("Redis SETEX error: {e}")))
            }
        }
    }
}
