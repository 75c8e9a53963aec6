//! Shared constants and invariants

pub const DEFAULT_REFRESH_SKEW_SECS: u64 = 10;
pub const DEFAULT_ACQUISITION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_REAUTH_FALLBACKS: u32 = 1;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

// Connection to the Keycloak server
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 60;
pub const CONNECTION_RETRIES: u32 = 1;

// Keycloak endpoints, relative to the server base URL
pub const URL_TOKEN: &str = "realms/{realm-name}/protocol/openid-connect/token";
pub const URL_LOGOUT: &str = "realms/{realm-name}/protocol/openid-connect/logout";

// Grant types
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
