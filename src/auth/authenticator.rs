use std::fmt;
use std::future::Future;

use thiserror::Error;

use crate::auth::identity::{CredentialIdentity, GrantContext};
use crate::cache::token_record::TokenRecord;
use crate::utils::constants::{GRANT_CLIENT_CREDENTIALS, GRANT_PASSWORD, GRANT_REFRESH_TOKEN};

/// OAuth2 grant submitted to the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    Password,
    ClientCredentials,
    RefreshToken(String),
}

impl Grant {
    /// The full-authentication grant matching the identity's context.
    pub fn primary_for(identity: &CredentialIdentity) -> Self {
        match identity.context() {
            GrantContext::ClientCredentials => Grant::ClientCredentials,
            GrantContext::Password { .. } => Grant::Password,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::Password => GRANT_PASSWORD,
            Grant::ClientCredentials => GRANT_CLIENT_CREDENTIALS,
            Grant::RefreshToken(_) => GRANT_REFRESH_TOKEN,
        }
    }

    pub fn is_refresh(&self) -> bool {
        matches!(self, Grant::RefreshToken(_))
    }
}

// refresh tokens stay out of logs
impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::RefreshToken(_) => f.write_str("RefreshToken([REDACTED])"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Failure signal of an [`Authenticator`].
///
/// `InvalidGrant` and `Unauthorized` are final; the rest may be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid_grant{}", description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    InvalidGrant { description: Option<String> },

    #[error("{code}{}", description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Unauthorized {
        code: String,
        description: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::Transport(_) | AuthError::Server { .. } | AuthError::InvalidResponse(_)
        )
    }
}

/// Performs the network exchange with the identity provider.
///
/// Implementations must be safe to call again after a retryable failure.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        identity: &CredentialIdentity,
        grant: Grant,
    ) -> impl Future<Output = Result<TokenRecord, AuthError>> + Send;

    /// Ends the provider-side session bound to `refresh_token`.
    fn logout(
        &self,
        _identity: &CredentialIdentity,
        _refresh_token: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send {
        async { Ok(()) }
    }
}
