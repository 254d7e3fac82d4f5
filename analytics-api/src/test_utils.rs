//! Test doubles for the warehouse and cache collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;

use crate::Application;
use crate::cache::{self, CacheError, CacheStore, MemoryCacheStore};
use crate::config::{CacheBackend, Config};
use crate::warehouse::{self, QueryOutput, QueryPlan, Warehouse, WarehouseError};

pub const TEST_API_KEY: &str = "test-api-key";

pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.auth.api_key = TEST_API_KEY.to_string();
    config.cache.backend = CacheBackend::Memory { max_capacity: 1_000 };
    config
}

/// In-memory warehouse: returns a canned [`QueryOutput`] (or a canned failure) and records every
/// plan it is asked to run.
#[derive(Default)]
pub struct FakeWarehouse {
    output: Mutex<QueryOutput>,
    failure: Mutex<Option<String>>,
    plans: Mutex<Vec<QueryPlan>>,
    calls: AtomicUsize,
}

impl FakeWarehouse {
    pub fn returning(output: QueryOutput) -> Self {
        Self {
            output: Mutex::new(output),
            ..Default::default()
        }
    }

    /// Every call fails as if the warehouse were unreachable
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Mutex::new(Some(message.to_string())),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_plan(&self) -> Option<QueryPlan> {
        self.plans.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn execute(&self, plan: &QueryPlan) -> warehouse::Result<QueryOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.plans.lock().unwrap().push(plan.clone());

        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(WarehouseError::Unavailable(message));
        }

        let mut output = self.output.lock().unwrap().clone();
        if plan.count.is_none() {
            output.total_records = None;
        }
        Ok(output)
    }
}

/// Memory store that counts reads and writes and remembers the last TTL it was given
pub struct CountingCacheStore {
    inner: MemoryCacheStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
    last_ttl: Mutex<Option<Duration>>,
}

impl CountingCacheStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryCacheStore::new(1_000),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            last_ttl: Mutex::new(None),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn last_ttl(&self) -> Option<Duration> {
        *self.last_ttl.lock().unwrap()
    }
}

#[async_trait]
impl CacheStore for CountingCacheStore {
    async fn get(&self, key: &str) -> cache::Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, payload: &str, ttl: Duration) -> cache::Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        *self.last_ttl.lock().unwrap() = Some(ttl);
        self.inner.set_ex(key, payload, ttl).await
    }
}

/// Store whose backend is always down
#[derive(Default)]
pub struct FailingCacheStore {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> cache::Result<Option<String>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("Connection refused (os error 111)".to_string()))
    }

    async fn set_ex(&self, _key: &str, _payload: &str, _ttl: Duration) -> cache::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("Connection refused (os error 111)".to_string()))
    }
}

/// Test server over the given backends, using [`create_test_config`]
pub fn create_test_app(warehouse: Arc<dyn Warehouse>, cache: Arc<dyn CacheStore>) -> TestServer {
    Application::with_backends(create_test_config(), warehouse, cache).into_test_server()
}
