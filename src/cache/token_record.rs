use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token record invariant violated: {0}")]
pub struct RecordError(pub String);

/// One issued token set. Never mutated; a refresh produces a new record.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    access_token: String,
    refresh_token: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    refresh_expires_at: Option<DateTime<Utc>>,
    token_type: String,
    scope: Option<String>,
}

impl TokenRecord {
    /// Fails when an expiry is not strictly after `issued_at`.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        refresh_expires_at: Option<DateTime<Utc>>,
        token_type: impl Into<String>,
    ) -> Result<Self, RecordError> {
        if expires_at <= issued_at {
            return Err(RecordError(format!(
                "access expiry {expires_at} is not after issued-at {issued_at}"
            )));
        }
        if let Some(refresh_expires_at) = refresh_expires_at {
            if refresh_expires_at <= issued_at {
                return Err(RecordError(format!(
                    "refresh expiry {refresh_expires_at} is not after issued-at {issued_at}"
                )));
            }
        }
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(RecordError("access token is empty".into()));
        }
        let token_type = token_type.into();
        Ok(Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            issued_at,
            expires_at,
            refresh_expires_at,
            token_type: if token_type.is_empty() {
                DEFAULT_TOKEN_TYPE.to_owned()
            } else {
                token_type
            },
            scope: None,
        })
    }

    /// Builds a record from token-endpoint style relative lifetimes.
    pub fn from_lifetimes(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        issued_at: DateTime<Utc>,
        expires_in: Duration,
        refresh_expires_in: Option<Duration>,
    ) -> Result<Self, RecordError> {
        let after = |lifetime: Duration| {
            issued_at
                .checked_add_signed(lifetime)
                .ok_or_else(|| RecordError(format!("lifetime {lifetime} out of range")))
        };
        Self::new(
            access_token,
            refresh_token,
            issued_at,
            after(expires_in)?,
            refresh_expires_in.map(after).transpose()?,
            DEFAULT_TOKEN_TYPE,
        )
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope.filter(|s| !s.is_empty());
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        self.refresh_expires_at
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// True while `now` is before the access expiry minus `skew`.
    /// A skew reaching past the minimum representable time means never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(skew)
            .is_some_and(|deadline| now < deadline)
    }

    /// True while the access token is past expiry by less than `grace`.
    /// A grace reaching past the maximum representable time never ends.
    pub fn is_within_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.expires_at
            .checked_add_signed(grace)
            .map_or(true, |deadline| now < deadline)
    }

    /// Refresh token usable at `now`. A missing refresh expiry means it does not expire.
    pub fn live_refresh_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.refresh_token.as_deref()?;
        match self.refresh_expires_at {
            Some(refresh_expires_at) if now >= refresh_expires_at => None,
            _ => Some(token),
        }
    }

    pub fn to_access_token(&self) -> AccessToken {
        AccessToken {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// What `get_token` hands back to callers.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn bearer_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
