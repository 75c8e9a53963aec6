use std::collections::HashMap;
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::auth::identity::{CredentialIdentity, GrantContext};
use crate::auth::keycloak::ClientSecrets;
use crate::config::settings::SettingsConfig;
use crate::connection::ConnectionOptions;
use crate::utils::constants::DEFAULT_CONNECTION_TIMEOUT_SECS;

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub settings: SettingsConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub identities: HashMap<String, IdentityConfig>,
}

/// ================================
/// Connection to Keycloak
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_verify")]
    pub verify: bool,
    #[serde(default)]
    pub proxies: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            verify: default_verify(),
            proxies: HashMap::new(),
            headers: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            headers: self.headers.clone(),
            timeout: Duration::from_secs(self.timeout_seconds),
            verify: self.verify,
            proxies: self.proxies.clone(),
        }
    }
}

/// ================================
/// Identities
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub issuer: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: Option<SecretValue>,
    pub grant: GrantConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GrantConfig {
    ClientCredentials,
    Password {
        username: String,
        password: SecretValue,
    },
}

/// Secret value sources
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum SecretValue {
    Literal(String),
    FromEnv {
        from_env: String,
    },
    FromFile {
        path: String,
    },
}

impl SecretValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            SecretValue::Literal(value) => Ok(value.to_owned()),
            SecretValue::FromEnv { from_env } => {
                env::var(from_env).map_err(|err| anyhow!("env '{}': {}", from_env, err))
            }
            SecretValue::FromFile { path } => fs::read_to_string(path)
                .map(|res| res.trim().to_string())
                .map_err(|err| anyhow!("file '{}': {}", path, err)),
        }
    }
}

impl IdentityConfig {
    pub fn identity(&self) -> CredentialIdentity {
        let context = match &self.grant {
            GrantConfig::ClientCredentials => GrantContext::ClientCredentials,
            GrantConfig::Password { username, .. } => GrantContext::Password {
                username: username.to_owned(),
            },
        };
        CredentialIdentity::new(&self.issuer, &self.realm, &self.client_id, context)
    }

    pub fn secrets(&self) -> Result<ClientSecrets> {
        let client_secret = self.client_secret.as_ref().map(SecretValue::resolve).transpose()?;
        let password = match &self.grant {
            GrantConfig::ClientCredentials => None,
            GrantConfig::Password { password, .. } => Some(password.resolve()?),
        };
        Ok(ClientSecrets { client_secret, password })
    }
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

fn default_verify() -> bool {
    true
}
