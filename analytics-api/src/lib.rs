//! # analytics-api: cached analytics queries over a reporting warehouse
//!
//! `analytics-api` is a read-only HTTP service. Each endpoint turns a date range and an optional
//! filter into an aggregation query against a PostgreSQL-protocol warehouse (Redshift in
//! production), caches the shaped result for a fixed TTL, and returns it as JSON.
//!
//! ## Request Flow
//!
//! Every analytics request passes through the same steps:
//!
//! 1. The credential middleware ([`auth`]) compares the API key header with the configured key.
//!    Mismatches are rejected with 401 before any backend is touched.
//! 2. The handler ([`api::handlers::analytics`]) builds a deterministic cache key from every
//!    filter and looks it up ([`cache`]). A hit is returned directly.
//! 3. On a miss, the handler hands a [`warehouse::QueryPlan`] to the [`warehouse::Warehouse`]
//!    gateway, which opens one connection, runs the count (for paginated resources) and row
//!    statements, and closes the connection on every path.
//! 4. Shaped rows are written back to the cache and wrapped in the response envelope.
//!
//! Cache faults never fail a request: the lookup or write is skipped and logged. Warehouse
//! faults fail the request with a 500 and nothing is cached.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use analytics_api::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = analytics_api::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     analytics_api::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod warehouse;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::api::handlers::analytics;
use crate::auth::middleware::require_api_key;
use crate::cache::{CacheAside, CacheStore};
use crate::openapi::ApiDoc;
use crate::warehouse::{PgWarehouse, Warehouse};

/// Shared state handed to every handler.
///
/// The warehouse gateway and cache store are constructed once at startup and injected here;
/// handlers never build clients themselves.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .warehouse(Arc::new(PgWarehouse::new(&config.warehouse)))
///     .cache(CacheAside::new(store, config.cache.ttl))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub warehouse: Arc<dyn Warehouse>,
    pub cache: CacheAside,
}

/// Build the application router.
///
/// Analytics routes sit behind the credential middleware. Health, docs and metrics do not.
pub fn build_router(state: AppState) -> Router {
    // `route_layer` so unknown paths are a plain 404 rather than a 401
    let analytics_routes = Router::new()
        .route("/api/v1/analytics/revenue/", get(analytics::get_revenue))
        .route("/api/v1/analytics/revenue", get(analytics::get_revenue))
        .route("/api/v1/analytics/sales/", get(analytics::get_sales))
        .route("/api/v1/analytics/sales", get(analytics::get_sales))
        .route("/api/v1/analytics/users/active", get(analytics::get_active_users))
        .route_layer(from_fn_with_state(state.clone(), require_api_key));

    let mut router = Router::new()
        .merge(analytics_routes)
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state(state.clone());

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// The assembled service: configuration, injected backends and router.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Build the warehouse gateway and cache store described by `config`.
    ///
    /// Neither backend is contacted here. The warehouse is connected per request, and the Redis
    /// store connects on first use, so the service starts even while they are down.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting analytics API with configuration: {:#?}", config);

        let warehouse: Arc<dyn Warehouse> = Arc::new(PgWarehouse::new(&config.warehouse));
        let cache = cache::create_store(&config.cache.backend)?;

        Ok(Self::with_backends(config, warehouse, cache))
    }

    /// Assemble the application around already constructed backends.
    pub fn with_backends(config: Config, warehouse: Arc<dyn Warehouse>, cache: Arc<dyn CacheStore>) -> Self {
        if config.auth.uses_default_key() {
            warn!("auth.api_key is the development default; set API_KEY before exposing this service");
        }

        let state = AppState::builder()
            .config(config.clone())
            .warehouse(warehouse)
            .cache(CacheAside::new(cache, config.cache.ttl))
            .build();
        let router = build_router(state);

        Self { router, config }
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Analytics API listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
