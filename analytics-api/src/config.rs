//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `ANALYTICS_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `ANALYTICS_` override YAML values
//! 3. **Deployment variables** - `API_KEY`, `REDSHIFT_HOST`, `REDSHIFT_DB`, `REDSHIFT_USER`,
//!    `REDSHIFT_PASSWORD` and `REDIS_HOST`, as used by existing deployments
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `ANALYTICS_CACHE__TTL=30m` sets the `cache.ttl` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use analytics_api::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! ANALYTICS_PORT=8080
//!
//! # Warehouse credentials
//! REDSHIFT_HOST=my-cluster.eu-west-1.redshift.amazonaws.com
//! REDSHIFT_PASSWORD=...
//!
//! # Switch the cache to the in-process backend with a shorter TTL
//! ANALYTICS_CACHE__BACKEND__TYPE=memory
//! ANALYTICS_CACHE__TTL=10m
//! ```

use std::fmt;
use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Development-only credential. Startup warns when it is still in use.
pub const DEFAULT_API_KEY: &str = "your-secret-api-key";

/// Stands in for secrets in `Debug` output
const REDACTED: &str = "[redacted]";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ANALYTICS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults matching a local development setup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Shared-secret credential check
    pub auth: AuthConfig,
    /// Analytics warehouse connection and relations
    pub warehouse: WarehouseConfig,
    /// Query result cache
    pub cache: CacheConfig,
    /// Page size bounds for paginated resources
    pub pagination: PaginationConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Export traces over OTLP (configured through the standard `OTEL_*` variables)
    pub enable_otel_export: bool,
    /// Redis hostname shortcut, set from `REDIS_HOST`. Rewrites the cache backend to Redis on
    /// that host, port 6379, database 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_host: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            auth: AuthConfig::default(),
            warehouse: WarehouseConfig::default(),
            cache: CacheConfig::default(),
            pagination: PaginationConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
            redis_host: None,
        }
    }
}

/// Shared-secret credential configuration.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Request header carrying the credential
    pub header_name: String,
    /// The single accepted credential value
    pub api_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: "X-API-Key".to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
        }
    }
}

impl AuthConfig {
    pub fn uses_default_key(&self) -> bool {
        self.api_key == DEFAULT_API_KEY
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("header_name", &self.header_name)
            .field("api_key", &REDACTED)
            .finish()
    }
}

/// TLS negotiation with the warehouse
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Warehouse connection settings.
///
/// A connection is opened per request and closed when the request's queries finish.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslMode,
    /// Relations and columns read by each resource
    pub tables: TablesConfig,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: "your-cluster.region.redshift.amazonaws.com".to_string(),
            port: 5439,
            database: "analyticsdb".to_string(),
            user: "your_user".to_string(),
            password: "your_pass".to_string(),
            ssl_mode: SslMode::default(),
            tables: TablesConfig::default(),
        }
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("ssl_mode", &self.ssl_mode)
            .field("tables", &self.tables)
            .finish()
    }
}

/// Relation and column names spliced into query text.
///
/// These are identifiers, not values, so they cannot be bound as parameters; [`Config::validate`]
/// restricts them to `[A-Za-z0-9_.]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TablesConfig {
    pub revenue: RevenueTable,
    /// Relation with `month, region, total, orders` columns
    pub sales: String,
    /// Relation with `date, active_users` columns
    pub active_users: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            revenue: RevenueTable::default(),
            sales: "monthly_sales".to_string(),
            active_users: "daily_active_users".to_string(),
        }
    }
}

/// Source of the revenue aggregation: a timestamped fact table summed per day and dimension.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RevenueTable {
    pub relation: String,
    /// Timestamp column, truncated to the day for grouping and range filtering
    pub timestamp_column: String,
    /// Categorical column reported as `product`
    pub dimension_column: String,
    /// Summed column reported as `total_revenue`
    pub measure_column: String,
}

impl Default for RevenueTable {
    fn default() -> Self {
        Self {
            relation: "dev_bronze.ext_canada_weather".to_string(),
            timestamp_column: "dt_txt".to_string(),
            dimension_column: "city_country".to_string(),
            measure_column: "humidity".to_string(),
        }
    }
}

/// Query result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Lifetime of each cached result
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Where cached results live
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheBackend {
    /// Shared Redis instance
    Redis {
        #[serde(default = "default_redis_url")]
        url: String,
        /// Prepended to every key, for sharing a Redis database between services
        #[serde(default)]
        key_prefix: String,
    },
    /// In-process cache; not shared between replicas
    Memory {
        #[serde(default = "default_memory_capacity")]
        max_capacity: u64,
    },
    /// No caching: every request goes to the warehouse
    Disabled,
}

impl Default for CacheBackend {
    fn default() -> Self {
        CacheBackend::Redis {
            url: default_redis_url(),
            key_prefix: String::new(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://redis:6379/0".to_string()
}

fn default_memory_capacity() -> u64 {
    10_000
}

/// Page size bounds for paginated resources
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    /// Page size used when the request does not specify one
    pub default_page_size: i64,
    /// Largest page size a request may ask for
    pub max_page_size: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 2,
            max_page_size: 100,
        }
    }
}

impl Config {
    /// Load configuration from the file named in `args`, the environment, and deployment
    /// variables, then validate it.
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(host) = config.redis_host.take() {
            let key_prefix = match &config.cache.backend {
                CacheBackend::Redis { key_prefix, .. } => key_prefix.clone(),
                _ => String::new(),
            };
            config.cache.backend = CacheBackend::Redis {
                url: format!("redis://{host}:6379/0"),
                key_prefix,
            };
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // (ANALYTICS_CONFIG names the file itself and is read by clap)
            .merge(Env::prefixed("ANALYTICS_").ignore(&["CONFIG"]).split("__"))
            // Variable names used by existing deployments
            .merge(Env::raw().only(&["API_KEY"]).map(|_| "auth.api_key".into()))
            .merge(Env::raw().only(&["REDSHIFT_HOST"]).map(|_| "warehouse.host".into()))
            .merge(Env::raw().only(&["REDSHIFT_DB"]).map(|_| "warehouse.database".into()))
            .merge(Env::raw().only(&["REDSHIFT_USER"]).map(|_| "warehouse.user".into()))
            .merge(Env::raw().only(&["REDSHIFT_PASSWORD"]).map(|_| "warehouse.password".into()))
            .merge(Env::raw().only(&["REDIS_HOST"]).map(|_| "redis_host".into()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.auth.api_key.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: auth.api_key must not be empty".to_string(),
            });
        }

        if self.auth.header_name.is_empty() || axum::http::HeaderName::try_from(self.auth.header_name.as_str()).is_err() {
            return Err(Error::Internal {
                operation: format!("Config validation: '{}' is not a valid header name", self.auth.header_name),
            });
        }

        if self.cache.ttl < Duration::from_secs(1) {
            return Err(Error::Internal {
                operation: "Config validation: cache.ttl must be at least 1 second".to_string(),
            });
        }

        if let CacheBackend::Memory { max_capacity: 0 } = self.cache.backend {
            return Err(Error::Internal {
                operation: "Config validation: cache.backend.max_capacity must be at least 1".to_string(),
            });
        }

        let pagination = &self.pagination;
        if pagination.max_page_size < 1 || pagination.default_page_size < 1 || pagination.default_page_size > pagination.max_page_size {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: Invalid pagination configuration: need 1 <= default_page_size ({}) <= max_page_size ({})",
                    pagination.default_page_size, pagination.max_page_size
                ),
            });
        }

        let tables = &self.warehouse.tables;
        for (field, identifier) in [
            ("warehouse.tables.revenue.relation", &tables.revenue.relation),
            ("warehouse.tables.revenue.timestamp_column", &tables.revenue.timestamp_column),
            ("warehouse.tables.revenue.dimension_column", &tables.revenue.dimension_column),
            ("warehouse.tables.revenue.measure_column", &tables.revenue.measure_column),
            ("warehouse.tables.sales", &tables.sales),
            ("warehouse.tables.active_users", &tables.active_users),
        ] {
            if !is_sql_identifier(identifier) {
                return Err(Error::Internal {
                    operation: format!("Config validation: {field} '{identifier}' is not a valid SQL identifier"),
                });
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optionally schema-qualified name made of ASCII letters, digits and underscores
fn is_sql_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}
