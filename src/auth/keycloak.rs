use std::collections::HashMap;
use std::fmt;

use http::StatusCode;
use reqwest::Response;
use tracing::{debug, info};

use crate::auth::authenticator::{AuthError, Authenticator, Grant};
use crate::auth::identity::CredentialIdentity;
use crate::auth::token_response::{TokenErrorResponse, TokenResponse};
use crate::cache::token_record::TokenRecord;
use crate::connection::{ConnectionError, ConnectionManager, ConnectionOptions, RequestBody};
use crate::helpers::time::{Clock, SystemClock};
use crate::utils::constants::{URL_LOGOUT, URL_TOKEN};

/// Secrets submitted with the grants of one identity.
#[derive(Clone, Default)]
pub struct ClientSecrets {
    pub client_secret: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// [`Authenticator`] talking to Keycloak's OpenID Connect endpoints.
///
/// One [`ConnectionManager`] per issuer; identities are registered with their
/// secrets before use.
#[derive(Debug)]
pub struct KeycloakAuthenticator<C = SystemClock> {
    options: ConnectionOptions,
    connections: HashMap<String, ConnectionManager>,
    secrets: HashMap<CredentialIdentity, ClientSecrets>,
    clock: C,
}

impl KeycloakAuthenticator<SystemClock> {
    pub fn new(options: ConnectionOptions) -> Self {
        Self::with_clock(options, SystemClock)
    }
}

impl<C: Clock> KeycloakAuthenticator<C> {
    pub fn with_clock(options: ConnectionOptions, clock: C) -> Self {
        Self {
            options,
            connections: HashMap::new(),
            secrets: HashMap::new(),
            clock,
        }
    }

    /// Registers an identity and its secrets, opening a connection to its issuer if needed.
    pub fn register(
        &mut self,
        identity: CredentialIdentity,
        secrets: ClientSecrets,
    ) -> Result<(), ConnectionError> {
        if !self.connections.contains_key(identity.issuer()) {
            let connection = ConnectionManager::new(identity.issuer(), self.options.clone())?;
            info!(issuer = identity.issuer(), "connection to issuer prepared");
            self.connections.insert(identity.issuer().to_owned(), connection);
        }
        self.secrets.insert(identity, secrets);
        Ok(())
    }

    pub fn connection(&self, issuer: &str) -> Option<&ConnectionManager> {
        self.connections.get(issuer)
    }

    fn lookup(
        &self,
        identity: &CredentialIdentity,
    ) -> Result<(&ConnectionManager, &ClientSecrets), AuthError> {
        let unregistered = || AuthError::Unauthorized {
            code: "unregistered_identity".into(),
            description: Some(format!("no credentials registered for {identity}")),
        };
        let connection = self.connections.get(identity.issuer()).ok_or_else(unregistered)?;
        let secrets = self.secrets.get(identity).ok_or_else(unregistered)?;
        Ok((connection, secrets))
    }

    fn token_form(
        identity: &CredentialIdentity,
        secrets: &ClientSecrets,
        grant: &Grant,
    ) -> Result<Vec<(String, String)>, AuthError> {
        let mut form = vec![
            ("grant_type".to_owned(), grant.as_str().to_owned()),
            ("client_id".to_owned(), identity.client_id().to_owned()),
        ];
        if let Some(client_secret) = &secrets.client_secret {
            form.push(("client_secret".to_owned(), client_secret.clone()));
        }

        match grant {
            Grant::Password => {
                let username = identity.username().ok_or_else(|| AuthError::Unauthorized {
                    code: "unsupported_grant_type".into(),
                    description: Some("password grant needs a username".into()),
                })?;
                let password = secrets.password.as_deref().unwrap_or_default();
                form.push(("username".to_owned(), username.to_owned()));
                form.push(("password".to_owned(), password.to_owned()));
            }
            Grant::ClientCredentials => {}
            Grant::RefreshToken(refresh_token) => {
                form.push(("refresh_token".to_owned(), refresh_token.clone()));
            }
        }
        Ok(form)
    }
}

impl<C: Clock> Authenticator for KeycloakAuthenticator<C> {
    async fn authenticate(
        &self,
        identity: &CredentialIdentity,
        grant: Grant,
    ) -> Result<TokenRecord, AuthError> {
        let (connection, secrets) = self.lookup(identity)?;
        let form = Self::token_form(identity, secrets, &grant)?;
        let path = realm_endpoint(URL_TOKEN, identity)?;

        // taken before the request so lifetimes never overshoot the server's
        let issued_at = self.clock.now();
        debug!(identity = %identity, grant = grant.as_str(), path = %path, "requesting token");

        let response = connection
            .raw_post(&path, RequestBody::Form(&form), None)
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        payload.into_record(issued_at)
    }

    async fn logout(
        &self,
        identity: &CredentialIdentity,
        refresh_token: &str,
    ) -> Result<(), AuthError> {
        let (connection, secrets) = self.lookup(identity)?;
        let mut form = vec![
            ("client_id".to_owned(), identity.client_id().to_owned()),
            ("refresh_token".to_owned(), refresh_token.to_owned()),
        ];
        if let Some(client_secret) = &secrets.client_secret {
            form.push(("client_secret".to_owned(), client_secret.clone()));
        }
        let path = realm_endpoint(URL_LOGOUT, identity)?;

        let response = connection
            .raw_post(&path, RequestBody::Form(&form), None)
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if response.status().is_success() {
            info!(identity = %identity, "provider session ended");
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Endpoint path for the identity's realm. Identities that fail validation never reach the wire.
fn realm_endpoint(template: &str, identity: &CredentialIdentity) -> Result<String, AuthError> {
    identity.validate().map_err(|e| AuthError::Unauthorized {
        code: "invalid_identity".into(),
        description: Some(e.to_string()),
    })?;
    Ok(template.replace("{realm-name}", identity.realm()))
}

/// Maps a non-2xx token endpoint answer onto the retryable / final split.
pub async fn error_from_response(response: Response) -> AuthError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_error(status, &body)
}

pub fn classify_error(status: StatusCode, body: &str) -> AuthError {
    let payload: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        let message = payload
            .error_description
            .or(payload.error)
            .unwrap_or_else(|| body.chars().take(200).collect());
        return AuthError::Server {
            status: status.as_u16(),
            message,
        };
    }

    match payload.error.as_deref() {
        Some("invalid_grant") => AuthError::InvalidGrant {
            description: payload.error_description,
        },
        Some(code) => AuthError::Unauthorized {
            code: code.to_owned(),
            description: payload.error_description,
        },
        None => AuthError::Unauthorized {
            code: format!("http_{}", status.as_u16()),
            description: (!body.is_empty()).then(|| body.chars().take(200).collect()),
        },
    }
}
