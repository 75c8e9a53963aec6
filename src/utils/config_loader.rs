use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::auth::identity::CredentialIdentity;
use crate::auth::keycloak::KeycloakAuthenticator;
use crate::cache::token_cache::TokenCache;
use crate::config::identities::ServiceConfig;
use crate::config::proc_loader::file_to_config;

/// Token cache as wired by the agent binary.
pub type AgentTokenCache = TokenCache<KeycloakAuthenticator>;

/// Configured identity names mapped to their cache keys.
pub type IdentityNames = HashMap<String, CredentialIdentity>;

pub async fn run(config_path: &str) -> Result<ServiceConfig> {
    let path = Path::new(config_path);
    let service_config = file_to_config(path)
        .await
        .map_err(|e| anyhow!("Invalid config format: {}", e))?;
    info!(
        path = config_path,
        identities = service_config.identities.len(),
        "config loaded"
    );
    Ok(service_config)
}

/// Registers every configured identity with a Keycloak authenticator and wraps it in a cache.
pub fn build_token_cache(service_config: &ServiceConfig) -> Result<(AgentTokenCache, IdentityNames)> {
    let mut authenticator = KeycloakAuthenticator::new(service_config.connection.options());
    let mut names = HashMap::with_capacity(service_config.identities.len());

    for (name, identity_cfg) in &service_config.identities {
        let identity = identity_cfg.identity();
        let secrets = identity_cfg
            .secrets()
            .with_context(|| format!("identity '{}': cannot resolve secrets", name))?;
        authenticator
            .register(identity.clone(), secrets)
            .with_context(|| format!("identity '{}': cannot prepare connection", name))?;
        info!(identity_name = name.as_str(), identity = %identity, "identity registered");
        names.insert(name.clone(), identity);
    }

    let cache = TokenCache::with_system_clock(
        authenticator,
        service_config.settings.token_cache_config(),
    );
    Ok((cache, names))
}
