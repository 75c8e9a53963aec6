use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::authenticator::AuthError;
use crate::cache::token_record::{TokenRecord, DEFAULT_TOKEN_TYPE};

/// Successful token endpoint payload.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Error payload (RFC 6749 section 5.2).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TokenErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}

impl TokenResponse {
    /// Converts the payload into a record issued at `issued_at`.
    ///
    /// `expires_in` wins; without it the access token's JWT `exp` claim is used.
    /// A `refresh_expires_in` of 0 (offline tokens) means the refresh token does not expire.
    pub fn into_record(self, issued_at: DateTime<Utc>) -> Result<TokenRecord, AuthError> {
        let expires_at = match self.expires_in {
            Some(expires_in) if expires_in > 0 => offset(issued_at, expires_in, "expires_in")?,
            Some(expires_in) => {
                return Err(AuthError::InvalidResponse(format!(
                    "expires_in must be positive, got {expires_in}"
                )))
            }
            None => {
                debug!("expires_in missing, reading exp claim of the access token");
                jwt_expiration(&self.access_token)?
            }
        };

        let refresh_expires_at = match self.refresh_expires_in {
            Some(refresh_expires_in) if refresh_expires_in > 0 => {
                Some(offset(issued_at, refresh_expires_in, "refresh_expires_in")?)
            }
            _ => None,
        };

        TokenRecord::new(
            self.access_token,
            self.refresh_token,
            issued_at,
            expires_at,
            refresh_expires_at,
            normalize_token_type(self.token_type.as_deref()),
        )
        .map(|record| record.with_scope(self.scope))
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

/// `issued_at + seconds`, failing instead of overflowing on absurd lifetimes.
fn offset(issued_at: DateTime<Utc>, seconds: i64, field: &str) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_seconds(seconds)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::InvalidResponse(format!("{field} {seconds} out of range")))
}

/// Keycloak answers `bearer`; callers expect the canonical `Bearer`.
fn normalize_token_type(token_type: Option<&str>) -> String {
    match token_type {
        Some(t) if t.eq_ignore_ascii_case("bearer") => DEFAULT_TOKEN_TYPE.to_owned(),
        Some(t) if !t.is_empty() => t.to_owned(),
        _ => DEFAULT_TOKEN_TYPE.to_owned(),
    }
}

fn jwt_expiration(token: &str) -> Result<DateTime<Utc>, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidResponse(
            "no expires_in and access token is not a JWT".into(),
        ));
    }

    let payload = parts[1].trim_end_matches('=');
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(payload))
        .map_err(|e| AuthError::InvalidResponse(format!("base64 decode error: {e}")))?;

    let claims: JwtClaims = serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::InvalidResponse(format!("invalid JWT payload: {e}")))?;

    DateTime::from_timestamp(claims.exp, 0).ok_or_else(|| {
        warn!(exp = claims.exp, "JWT exp out of range");
        AuthError::InvalidResponse(format!("JWT exp {} out of range", claims.exp))
    })
}
