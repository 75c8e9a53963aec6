// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use reqwest::Client;
use tokio::sync::Notify;

use crate::auth::authenticator::{AuthError, Authenticator, Grant};
use crate::auth::identity::CredentialIdentity;
use crate::cache::token_cache::{TokenCache, TokenCacheConfig};
use crate::cache::token_record::TokenRecord;
use crate::helpers::time::{Clock, ManualClock};

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

pub fn service_identity() -> CredentialIdentity {
    CredentialIdentity::client_credentials("http://kc.test", "apps", "backend")
}

pub fn user_identity() -> CredentialIdentity {
    CredentialIdentity::password("http://kc.test", "master", "admin-cli", "admin")
}

/// What the scripted provider answers to one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Issue {
        access: String,
        refresh: Option<String>,
        expires_in: i64,
        refresh_expires_in: Option<i64>,
    },
    Reject(AuthError),
}

/// One scripted call: optionally held until a gate opens or a delay passes.
#[derive(Debug, Clone)]
pub struct Step {
    pub reply: Reply,
    pub gate: Option<Arc<Notify>>,
    pub delay: Option<Duration>,
}

impl Step {
    pub fn issue(access: &str, refresh: Option<&str>, expires_in: i64) -> Self {
        Self::reply(Reply::Issue {
            access: access.to_owned(),
            refresh: refresh.map(str::to_owned),
            expires_in,
            refresh_expires_in: refresh.map(|_| 1800),
        })
    }

    pub fn reject(err: AuthError) -> Self {
        Self::reply(Reply::Reject(err))
    }

    /// A call that never answers within any test timeout.
    pub fn hang() -> Self {
        Self::issue("never", None, 300).after(Duration::from_secs(3600))
    }

    pub fn gated(mut self, gate: &Arc<Notify>) -> Self {
        self.gate = Some(gate.clone());
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn reply(reply: Reply) -> Self {
        Self { reply, gate: None, delay: None }
    }
}

pub fn invalid_grant() -> AuthError {
    AuthError::InvalidGrant {
        description: Some("Token is not active".into()),
    }
}

/// Authenticator replaying a script of replies and recording every grant it receives.
///
/// Once the script runs dry it issues `token-<n>` / `refresh-<n>` valid for 300s.
pub struct ScriptedAuthenticator {
    clock: ManualClock,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    grants: Mutex<Vec<Grant>>,
    logouts: Mutex<Vec<String>>,
}

impl ScriptedAuthenticator {
    pub fn new(clock: ManualClock, steps: Vec<Step>) -> Self {
        Self {
            clock,
            script: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            grants: Mutex::new(Vec::new()),
            logouts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.grants.lock().unwrap().clone()
    }

    pub fn logouts(&self) -> Vec<String> {
        self.logouts.lock().unwrap().clone()
    }
}

impl Authenticator for ScriptedAuthenticator {
    async fn authenticate(
        &self,
        _identity: &CredentialIdentity,
        grant: Grant,
    ) -> Result<TokenRecord, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.grants.lock().unwrap().push(grant);
        let step = self.script.lock().unwrap().pop_front();
        let issued_at = self.clock.now();

        let step = step.unwrap_or_else(|| {
            Step::issue(&format!("token-{n}"), Some(format!("refresh-{n}").as_str()), 300)
        });
        if let Some(gate) = &step.gate {
            gate.notified().await;
        }
        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }

        match step.reply {
            Reply::Issue { access, refresh, expires_in, refresh_expires_in } => TokenRecord::from_lifetimes(
                access,
                refresh,
                issued_at,
                ChronoDuration::seconds(expires_in),
                refresh_expires_in.map(ChronoDuration::seconds),
            )
            .map_err(|e| AuthError::InvalidResponse(e.to_string())),
            Reply::Reject(err) => Err(err),
        }
    }

    async fn logout(&self, _identity: &CredentialIdentity, refresh_token: &str) -> Result<(), AuthError> {
        self.logouts.lock().unwrap().push(refresh_token.to_owned());
        Ok(())
    }
}

pub type ScriptedCache = TokenCache<ScriptedAuthenticator, ManualClock>;

pub fn test_config() -> TokenCacheConfig {
    TokenCacheConfig {
        refresh_skew: Duration::from_secs(10),
        acquisition_timeout: Duration::from_secs(5),
        max_reauth_fallbacks: 1,
        grace_period: Duration::from_secs(30),
    }
}

/// Cache over a scripted provider with a clock frozen at the unix epoch.
pub fn scripted_cache(steps: Vec<Step>, config: TokenCacheConfig) -> (ScriptedCache, ManualClock) {
    let clock = ManualClock::at_epoch();
    let authenticator = ScriptedAuthenticator::new(clock.clone(), steps);
    (TokenCache::new(authenticator, clock.clone(), config), clock)
}

/// Lets spawned waiters reach the in-flight slot before the test moves on.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
