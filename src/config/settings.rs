use std::time::Duration;

use serde::Deserialize;

use crate::cache::token_cache::TokenCacheConfig;
use crate::utils::constants::{
    DEFAULT_ACQUISITION_TIMEOUT_MS, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_MAX_REAUTH_FALLBACKS,
    DEFAULT_REFRESH_SKEW_SECS,
};

/// ================================
/// Global service-wide settings
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    pub refresh_skew_seconds: Option<u64>,
    pub acquisition_timeout_ms: Option<u64>,
    /// full re-authentications after a rejected refresh; 0 disables the fallback
    pub max_reauth_fallbacks: Option<u32>,
    /// how long an expired token may be served while the provider times out
    pub grace_period_seconds: Option<u64>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub logging: Option<LoggingConfig>
}

impl SettingsConfig {
    pub fn token_cache_config(&self) -> TokenCacheConfig {
        TokenCacheConfig {
            refresh_skew: Duration::from_secs(self.refresh_skew_seconds.unwrap_or(DEFAULT_REFRESH_SKEW_SECS)),
            acquisition_timeout: Duration::from_millis(self.acquisition_timeout_ms.unwrap_or(DEFAULT_ACQUISITION_TIMEOUT_MS)),
            max_reauth_fallbacks: self.max_reauth_fallbacks.unwrap_or(DEFAULT_MAX_REAUTH_FALLBACKS),
            grace_period: Duration::from_secs(self.grace_period_seconds.unwrap_or(DEFAULT_GRACE_PERIOD_SECS)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
    #[serde(default)]
    pub is_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { path: default_metrics_path(), is_enabled: false }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new (level: String, format: LogFormat) -> Self {
        Self { level: level, format: format }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> String {
    "8099".to_string()
}
