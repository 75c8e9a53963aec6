use std::{fs, path::Path};
use crate::config::identities::ServiceConfig;
use crate::config::settings::{LogFormat, LoggingConfig};
use crate::observability::metrics::get_metrics;
use crate::utils::constants::{DEFAULT_GRACE_PERIOD_SECS, DEFAULT_REFRESH_SKEW_SECS};
use anyhow::{anyhow, Result};
use regex::Regex;
use tracing::{debug, error};
use crate::config::proc_validator;

/// Load and validate config from YAML file
pub async fn file_to_config(path: &Path) -> Result<ServiceConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read config '{}': {}", path.display(), e))?;

    let expanded = expand_env_vars(&content);
    parse_config(expanded).await
}

pub async fn parse_config(content: String) -> Result<ServiceConfig> {
    let metrics = get_metrics().await;
    let mut service_config: ServiceConfig = serde_yaml::from_str(&content)
        .inspect_err(|e| {
            error!("parse config error: {}", e);
            metrics.config_validation_errors.inc();
        })?;

    // Apply defaults
    if service_config.settings.logging.is_none() {
        service_config.settings.logging = Some(LoggingConfig{level: "info".to_owned(), format: LogFormat::Compact});
    }
    if service_config.settings.refresh_skew_seconds.is_none() {
        service_config.settings.refresh_skew_seconds = Some(DEFAULT_REFRESH_SKEW_SECS);
    }
    if service_config.settings.grace_period_seconds.is_none() {
        service_config.settings.grace_period_seconds = Some(DEFAULT_GRACE_PERIOD_SECS);
    }
    debug!("validation config ...");
    proc_validator::validate_service_config(&service_config)
        .await
        .map_err(|errors| anyhow!("config is not valid, total errors: {}\n{}", errors.len(), errors.join("\n")))?;

    Ok(service_config)
}

/// Replaces `${VAR}` and `${VAR:default}` with the environment value.
pub fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{(\w+)(?::([^\}]+))?\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}
