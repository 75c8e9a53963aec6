//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Validates:
//!   * cache tuning bounds (skew, timeout, grace, fallbacks)
//!   * server / metrics / logging settings
//!   * connection proxies
//!   * identity well-formedness and uniqueness

use std::collections::HashMap;
use tracing::{error, info};
use url::Url;

use crate::auth::identity::CredentialIdentity;
use crate::config::identities::{ConnectionConfig, GrantConfig, IdentityConfig, SecretValue, ServiceConfig};
use crate::config::settings::SettingsConfig;
use crate::observability::metrics::get_metrics;

const MAX_REASONABLE_SECONDS: u64 = 60 * 60 * 24 * 365;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub async fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);
    validate_connection(&cfg.connection, &mut errors);

    // Identities must not be empty
    if cfg.identities.is_empty() {
        errors.push("config: 'identities' is empty; at least one identity required".to_string());
    }

    // the same credential identity must not be configured twice under different names
    let mut seen: HashMap<CredentialIdentity, String> = HashMap::new();
    let mut names: Vec<&String> = cfg.identities.keys().collect();
    names.sort();
    for name in names {
        let identity_cfg = &cfg.identities[name];
        validate_identity(name, identity_cfg, &mut errors);

        if let Some(prev) = seen.insert(identity_cfg.identity(), name.clone()) {
            errors.push(format!(
                "identity['{}'] and identity['{}'] are duplicate: same issuer, realm, client and grant",
                prev, name
            ));
        }
    }

    if errors.is_empty() {
        info!("config valid");
        Ok(())
    } else {
        error!("configuration validation errors ({}):", errors.len());
        for e in &errors {
            error!(" - {}", e);
        }
        get_metrics().await.config_validation_errors.inc();
        Err(errors)
    }
}

/// SETTINGS VALIDATION
fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    for (field, value) in [
        ("refresh_skew_seconds", settings.refresh_skew_seconds),
        ("grace_period_seconds", settings.grace_period_seconds),
    ] {
        if let Some(value) = value {
            if value > MAX_REASONABLE_SECONDS {
                errors.push(format!("settings.{} ({}) is unreasonably large", field, value));
            }
        }
    }

    if let Some(timeout) = settings.acquisition_timeout_ms {
        if timeout == 0 {
            errors.push("settings.acquisition_timeout_ms must be greater than 0".to_string());
        }
    }

    if let Some(fallbacks) = settings.max_reauth_fallbacks {
        if fallbacks > 1 {
            errors.push(format!(
                "settings.max_reauth_fallbacks ({}) must be 0 or 1; a rejected full authentication is final",
                fallbacks
            ));
        }
    }

    if settings.server.host.is_empty() {
        errors.push("settings.server.host must not be empty".to_string());
    }
    if settings.server.port.parse::<u16>().is_err() {
        errors.push(format!(
            "settings.server.port '{}' must be a valid port number",
            settings.server.port
        ));
    }

    if settings.metrics.is_enabled && !settings.metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            settings.metrics.path
        ));
    }

    if let Some(logging) = &settings.logging {
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' must be one of {:?}",
                logging.level, LOG_LEVELS
            ));
        }
    }
}

/// CONNECTION VALIDATION
fn validate_connection(connection: &ConnectionConfig, errors: &mut Vec<String>) {
    if connection.timeout_seconds == 0 {
        errors.push("connection.timeout_seconds must be greater than 0".to_string());
    }
    for (prefix, proxy) in &connection.proxies {
        if Url::parse(proxy).is_err() {
            errors.push(format!(
                "connection.proxies['{}'] proxy '{}' is not a valid URL",
                prefix, proxy
            ));
        }
    }
}

/// IDENTITY VALIDATION
fn validate_identity(name: &str, identity_cfg: &IdentityConfig, errors: &mut Vec<String>) {
    if let Err(e) = identity_cfg.identity().validate() {
        errors.push(format!("identity['{}']: {}", name, e));
    }

    match &identity_cfg.grant {
        GrantConfig::ClientCredentials => {
            if identity_cfg.client_secret.is_none() {
                errors.push(format!(
                    "identity['{}']: client_credentials grant requires client_secret",
                    name
                ));
            }
        }
        GrantConfig::Password { password, .. } => {
            if let SecretValue::Literal(value) = password {
                if value.is_empty() {
                    errors.push(format!("identity['{}']: password must not be empty", name));
                }
            }
        }
    }
}
