//! Configuration loading.
//!
//! Layered, later sources win:
//! 1. defaults in code
//! 2. `config/<environment>.toml` (optional)
//! 3. environment variables, `STOCKROOM_` prefix, `__` between sections
//!    (`STOCKROOM_STALENESS__POLL_INTERVAL_MS=1000`)

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::warn;

use stockroom_inventory::StatusBands;

use crate::aggregator::StalenessPolicy;
use crate::ledger::MAX_PAGE_SIZE;
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Signing secret used when none is configured. Development only.
pub const DEV_JWT_SECRET: &str = "stockroom-dev-secret-change-me";

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    /// development, production, ...
    pub environment: String,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub staleness: StalenessConfig,
    pub status_bands: StatusBandsConfig,
    pub retry: RetryConfig,
    pub history: HistoryConfig,
    pub log: LogConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens.
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one the ledger lives in memory.
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

/// The single staleness knob for readers other than the writer.
#[derive(Debug, Deserialize, Clone)]
pub struct StalenessConfig {
    pub poll_interval_ms: u64,
    pub push_refresh: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusBandsConfig {
    pub very_low: f64,
    pub low: f64,
    pub normal: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    pub page_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// `json` or `pretty`.
    pub format: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    /// Redis URL for cross-process change notification (`redis` feature).
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

impl InventoryConfig {
    /// Load for the environment named by `STOCKROOM_ENVIRONMENT` (default `development`).
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("STOCKROOM_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = Self::defaults(&environment)?
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(
                Environment::with_prefix("STOCKROOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Defaults plus explicit overrides, with no file or environment layer.
    pub fn from_overrides(environment: &str, overrides: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults(environment)?;
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Log a warning for settings that are unsafe outside development.
    ///
    /// Separate from [`load`](Self::load) so it runs after tracing is installed.
    pub fn warn_insecure_defaults(&self) {
        if self.auth.jwt_secret == DEV_JWT_SECRET {
            warn!(environment = %self.environment, "auth.jwt_secret not set; using the development secret");
        }
    }

    /// Builder preloaded with every default.
    pub fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.jwt_secret", DEV_JWT_SECRET)?
            .set_default("database.max_connections", 5)?
            .set_default("staleness.poll_interval_ms", 5000)?
            .set_default("staleness.push_refresh", true)?
            .set_default("status_bands.very_low", 0.25)?
            .set_default("status_bands.low", 0.5)?
            .set_default("status_bands.normal", 0.75)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 10)?
            .set_default("retry.max_delay_ms", 200)?
            .set_default("history.page_size", 50)?
            .set_default("log.format", "json")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.status_bands().map_err(|e| ConfigError::Message(format!("status_bands: {e}")))?;
        if self.history.page_size == 0 || self.history.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Message(format!(
                "history.page_size must be within 1..={MAX_PAGE_SIZE}"
            )));
        }
        if !matches!(self.log.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::Message(format!(
                "log.format must be json or pretty, got '{}'",
                self.log.format
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Message(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn staleness_policy(&self) -> StalenessPolicy {
        StalenessPolicy {
            poll_interval: Duration::from_millis(self.staleness.poll_interval_ms),
            push_refresh: self.staleness.push_refresh,
        }
    }

    pub fn status_bands(&self) -> stockroom_core::DomainResult<StatusBands> {
        let b = &self.status_bands;
        StatusBands::new(b.very_low, b.low, b.normal)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            strategy: BackoffStrategy::Exponential,
            ..RetryPolicy::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
