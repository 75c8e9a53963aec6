use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TokenError;

const REALM_FORBIDDEN: &[char] = &['/', '\\', '?', '#', '%'];

/// What the primary (non-refresh) grant authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GrantContext {
    ClientCredentials,
    Password { username: String },
}

/// Key under which tokens are cached.
///
/// Holds no secrets: client secrets and passwords stay with the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialIdentity {
    issuer: String,
    realm: String,
    client_id: String,
    context: GrantContext,
}

impl CredentialIdentity {
    pub fn new(
        issuer: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        context: GrantContext,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            context,
        }
    }

    pub fn client_credentials(
        issuer: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self::new(issuer, realm, client_id, GrantContext::ClientCredentials)
    }

    pub fn password(
        issuer: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self::new(
            issuer,
            realm,
            client_id,
            GrantContext::Password {
                username: username.into(),
            },
        )
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn context(&self) -> &GrantContext {
        &self.context
    }

    pub fn username(&self) -> Option<&str> {
        match &self.context {
            GrantContext::Password { username } => Some(username.as_str()),
            GrantContext::ClientCredentials => None,
        }
    }

    /// Checks the identity is well formed before any cache state is touched.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.issuer.trim().is_empty() {
            return Err(TokenError::InvalidIdentity("issuer must not be empty".into()));
        }
        match Url::parse(&self.issuer) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(TokenError::InvalidIdentity(format!(
                    "issuer '{}' must use http or https, got '{}'",
                    self.issuer,
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(TokenError::InvalidIdentity(format!(
                    "issuer '{}' is not a valid URL: {}",
                    self.issuer, e
                )))
            }
        }
        if self.realm.trim().is_empty() {
            return Err(TokenError::InvalidIdentity("realm must not be empty".into()));
        }
        // the realm becomes one path segment of the provider endpoints
        if self.realm == "." || self.realm == ".." || self.realm.contains(REALM_FORBIDDEN) {
            return Err(TokenError::InvalidIdentity(format!(
                "realm '{}' must be a single path segment without '/', '?', '#', '%' or '\\'",
                self.realm
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(TokenError::InvalidIdentity("client_id must not be empty".into()));
        }
        if let GrantContext::Password { username } = &self.context {
            if username.trim().is_empty() {
                return Err(TokenError::InvalidIdentity(
                    "username must not be empty for password grants".into(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for CredentialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            GrantContext::ClientCredentials => {
                write!(f, "{}/{}/{}", self.issuer.trim_end_matches('/'), self.realm, self.client_id)
            }
            GrantContext::Password { username } => write!(
                f,
                "{}/{}/{}@{}",
                self.issuer.trim_end_matches('/'),
                self.realm,
                self.client_id,
                username
            ),
        }
    }
}
