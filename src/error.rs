//! Error taxonomy surfaced by the token cache.

use thiserror::Error;

use crate::auth::authenticator::AuthError;

/// Why a transient acquisition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The acquisition did not finish within the configured timeout.
    Timeout,
    /// Connection or transport level failure.
    Network,
    /// The provider answered with a retryable status (5xx, 408, 429).
    Server,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::Network => "network",
            TransientKind::Server => "server",
        }
    }
}

/// Error returned by [`TokenCache`](crate::cache::token_cache::TokenCache) operations.
///
/// `Clone` because one acquisition outcome is handed to every waiter joined to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The identity is malformed. Caller bug, never retried.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Credentials or grant rejected by the provider.
    #[error("authentication failed: {code}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthenticationFailed {
        code: String,
        description: Option<String>,
    },

    /// Network, timeout or 5xx failure. Eligible for caller-level retry.
    #[error("transient authentication error ({}): {message}", kind.as_str())]
    TransientAuthError { kind: TransientKind, message: String },

    /// The caller stopped waiting.
    #[error("token request cancelled")]
    Cancelled,
}

impl TokenError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenError::TransientAuthError { .. })
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, TokenError::AuthenticationFailed { .. })
    }

    /// Provider error code, when the provider supplied one.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            TokenError::AuthenticationFailed { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::InvalidIdentity(_) => "invalid_identity",
            TokenError::AuthenticationFailed { .. } => "authentication_failed",
            TokenError::TransientAuthError { kind, .. } => kind.as_str(),
            TokenError::Cancelled => "cancelled",
        }
    }

    pub(crate) fn timeout(timeout_ms: u128) -> Self {
        TokenError::TransientAuthError {
            kind: TransientKind::Timeout,
            message: format!("acquisition exceeded {timeout_ms}ms"),
        }
    }
}

impl From<AuthError> for TokenError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidGrant { description } => TokenError::AuthenticationFailed {
                code: "invalid_grant".to_owned(),
                description,
            },
            AuthError::Unauthorized { code, description } => {
                TokenError::AuthenticationFailed { code, description }
            }
            AuthError::Transport(message) => TokenError::TransientAuthError {
                kind: TransientKind::Network,
                message,
            },
            AuthError::Server { status, message } => TokenError::TransientAuthError {
                kind: TransientKind::Server,
                message: format!("provider returned {status}: {message}"),
            },
            AuthError::InvalidResponse(message) => TokenError::TransientAuthError {
                kind: TransientKind::Server,
                message: format!("invalid token response: {message}"),
            },
        }
    }
}
