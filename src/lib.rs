//! # Keycloak Token Agent
//!
//! Acquires OpenID Connect tokens from Keycloak, caches them per credential
//! identity and hands out valid access tokens to any number of concurrent
//! callers.
//!
//! Modules:
//! - `cache`: token cache with single-flight acquisition and invalidation
//! - `auth`: identities, the authenticator seam and the Keycloak client
//! - `connection`: HTTP connection manager used by the Keycloak client
//! - `config`: YAML service configuration and its validation
//! - `server`: HTTP surface serving cached tokens

pub mod auth;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod helpers;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod tests;
pub mod utils;

pub use crate::auth::authenticator::{AuthError, Authenticator, Grant};
pub use crate::auth::identity::{CredentialIdentity, GrantContext};
pub use crate::cache::token_cache::{TokenCache, TokenCacheConfig};
pub use crate::cache::token_record::{AccessToken, TokenRecord};
pub use crate::config::identities::ServiceConfig;
pub use crate::error::{TokenError, TransientKind};
pub use crate::helpers::time::{Clock, ManualClock, SystemClock};
