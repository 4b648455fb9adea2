//! Gateway configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and serde default functions
//! 2. **Config file**: TOML file named by the `RELAY_CONFIG` env var
//! 3. **Environment variables**: `RELAY__*` env vars override specific fields
//!
//! # Example
//!
//! ```toml
//! [protocol]
//! name = "shannon"
//!
//! [[protocol.service_fallbacks]]
//! service_id = "eth"
//! send_all_traffic = false
//! fallback_urls = ["https://eth.fallback.example"]
//!
//! [cache_manager]
//! refresh_interval_seconds = 60
//! session_workers = 100
//!
//! [sanctions]
//! session_ttl_seconds = 3600
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use crate::{
    cache::CacheRefreshConfig,
    chain::RolloverConfig,
    protocol::ProtocolConfig,
    relay::{RelayConfig, TransportConfig},
    sanction::SanctionConfig,
    signing::SignatureCacheConfig,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path};

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Root configuration for the endpoint lifecycle layer.
///
/// Environment overrides use the `RELAY` prefix with `__` between nesting levels, e.g.
/// `RELAY__SANCTIONS__SESSION_TTL_SECONDS=600`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Background session refresh.
    #[serde(default)]
    pub cache_manager: CacheRefreshConfig,

    #[serde(default)]
    pub sanctions: SanctionConfig,

    #[serde(default)]
    pub signature_cache: SignatureCacheConfig,

    #[serde(default)]
    pub rollover: RolloverConfig,

    /// Dispatch limits and timeouts.
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment variables still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or the merged result cannot be
    /// deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("protocol.name", "shannon")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("RELAY").prefix_separator("__").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the path in `RELAY_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.protocol.name.trim().is_empty() {
            return Err("Protocol name must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for fallback in &self.protocol.service_fallbacks {
            if fallback.service_id.is_empty() {
                return Err("Fallback service id must not be empty".to_string());
            }
            if !seen.insert(fallback.service_id.clone()) {
                return Err(format!("Duplicate fallback configuration for service {}", fallback.service_id));
            }
            if fallback.send_all_traffic && fallback.fallback_urls.is_empty() {
                return Err(format!(
                    "Service {} sends all traffic to fallback but has no fallback URLs",
                    fallback.service_id
                ));
            }
            for url in &fallback.fallback_urls {
                if url::Url::parse(url).is_err() || !url.starts_with("http") {
                    return Err(format!("Invalid fallback URL for service {}: {url}", fallback.service_id));
                }
            }
        }

        if self.cache_manager.refresh_interval_seconds == 0 {
            return Err("Cache refresh interval must be greater than 0".to_string());
        }

        if self.cache_manager.session_workers == 0 {
            return Err("Session workers must be greater than 0".to_string());
        }

        if self.sanctions.session_ttl_seconds == 0 || self.sanctions.sweep_interval_seconds == 0 {
            return Err("Sanction TTL and sweep interval must be greater than 0".to_string());
        }

        if self.signature_cache.enabled && self.signature_cache.ttl_seconds == 0 {
            return Err("Signature cache TTL must be greater than 0".to_string());
        }

        if self.rollover.poll_interval_seconds == 0 {
            return Err("Rollover poll interval must be greater than 0".to_string());
        }

        if self.relay.concurrency_limit == 0 {
            return Err("Relay concurrency limit must be greater than 0".to_string());
        }

        if self.relay.default_timeout_ms == 0 {
            return Err("Relay timeout must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
