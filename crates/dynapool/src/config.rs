// Control plane configuration
//
// Loaded from environment variables with defaults for everything optional.

use std::collections::HashMap;
use std::time::Duration;

use crate::limiter::RateLimiterConfig;
use crate::monitor::MonitorConfig;
use crate::notify::NotifyItem;

/// Prefix for every variable the control plane reads, and for environment
/// properties exposed through the context bridge
pub const ENV_PREFIX: &str = "DYNAPOOL_";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Control plane configuration
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// PostgreSQL URL for the shared rate-limit store; in-memory when unset
    pub database_url: Option<String>,

    /// Connection pool size for the shared store
    pub db_max_connections: u32,

    pub rate_limiter: RateLimiterConfig,

    pub monitor: MonitorConfig,

    /// Prefix of environment variables loaded as context properties
    pub env_prefix: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            rate_limiter: RateLimiterConfig::default(),
            monitor: MonitorConfig::default(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl ControlPlaneConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: PostgreSQL URL for the shared rate-limit store
    /// - `DYNAPOOL_DB_MAX_CONNECTIONS`: store connection pool size (default: 5)
    /// - `DYNAPOOL_STORE_TIMEOUT_MS`: rate-limit round trip deadline (default: 500)
    /// - `DYNAPOOL_KEY_PREFIX`: rate-limit key namespace (default: `dynapool:notify:`)
    /// - `DYNAPOOL_MONITOR_INTERVAL_SECS`: monitor tick interval (default: 5)
    /// - `DYNAPOOL_MONITOR_JITTER_MS`: maximum random delay before the first tick (default: 500)
    /// - `DYNAPOOL_PURGE_INTERVAL_SECS`: expired window purge interval (default: 60)
    /// - `DYNAPOOL_NOTIFY_ITEMS`: JSON array of notify items replacing the defaults
    /// - `DYNAPOOL_POOL_NOTIFY_ITEMS`: JSON object of per-pool notify item overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());

        let db_max_connections = var("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.db_max_connections);

        let mut rate_limiter = defaults.rate_limiter;
        if let Some(ms) = var("STORE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            rate_limiter.timeout = Duration::from_millis(ms);
        }
        if let Some(prefix) = var("KEY_PREFIX") {
            rate_limiter.key_prefix = prefix;
        }

        let mut monitor = defaults.monitor;
        if let Some(secs) = var("MONITOR_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            monitor.interval = Duration::from_secs(secs);
        }
        if let Some(ms) = var("MONITOR_JITTER_MS").and_then(|v| v.parse().ok()) {
            monitor.initial_jitter = Duration::from_millis(ms);
        }
        if let Some(secs) = var("PURGE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            monitor.purge_interval = Duration::from_secs(secs);
        }
        if let Some(json) = var("NOTIFY_ITEMS") {
            monitor.notify_items = parse_json(&format!("{ENV_PREFIX}NOTIFY_ITEMS"), &json)?;
        }
        if let Some(json) = var("POOL_NOTIFY_ITEMS") {
            monitor.pool_notify_items =
                parse_json::<HashMap<String, Vec<NotifyItem>>>(&format!("{ENV_PREFIX}POOL_NOTIFY_ITEMS"), &json)?;
        }

        Ok(Self {
            database_url,
            db_max_connections,
            rate_limiter,
            monitor,
            env_prefix: defaults.env_prefix,
        })
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(var: &str, json: &str) -> Result<T, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
        var: var.to_string(),
        message: e.to_string(),
    })
}
