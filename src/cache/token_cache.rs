use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::authenticator::{Authenticator, Grant};
use crate::auth::identity::CredentialIdentity;
use crate::cache::cache_entry::{CacheEntry, InFlight, Outcome};
use crate::cache::token_record::{AccessToken, TokenRecord};
use crate::error::{TokenError, TransientKind};
use crate::helpers::time::{get_instant, Clock, SystemClock};
use crate::observability::metrics::{get_metrics, OUTCOME_ACQUIRE, OUTCOME_GRACE, OUTCOME_HIT, OUTCOME_JOIN};
use crate::utils::constants::{
    DEFAULT_ACQUISITION_TIMEOUT_MS, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_MAX_REAUTH_FALLBACKS,
    DEFAULT_REFRESH_SKEW_SECS,
};

/// Tuning knobs of the token cache.
#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    /// Margin subtracted from the advertised expiry before a token counts as stale.
    pub refresh_skew: Duration,
    /// Upper bound for one call to the authenticator.
    pub acquisition_timeout: Duration,
    /// Full authentications allowed after the provider rejects a refresh. 0 disables the fallback.
    pub max_reauth_fallbacks: u32,
    /// How long past expiry a token may still be served when the provider times out.
    pub grace_period: Duration,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::from_secs(DEFAULT_REFRESH_SKEW_SECS),
            acquisition_timeout: Duration::from_millis(DEFAULT_ACQUISITION_TIMEOUT_MS),
            max_reauth_fallbacks: DEFAULT_MAX_REAUTH_FALLBACKS,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Process-scoped token cache keyed by [`CredentialIdentity`].
///
/// Cheap to clone; clones share state. Every identity has its own lock, so
/// acquiring a token for one identity never blocks lookups for another. At
/// most one acquisition per identity runs at a time; concurrent callers join it.
pub struct TokenCache<A, C = SystemClock> {
    inner: Arc<Inner<A, C>>,
}

impl<A, C> Clone for TokenCache<A, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<A, C> {
    authenticator: A,
    clock: C,
    config: TokenCacheConfig,
    entries: RwLock<HashMap<CredentialIdentity, Arc<Mutex<CacheEntry>>>>,
    next_acquisition_id: AtomicU64,
}

impl<A: Authenticator> TokenCache<A, SystemClock> {
    pub fn with_system_clock(authenticator: A, config: TokenCacheConfig) -> Self {
        Self::new(authenticator, SystemClock, config)
    }
}

impl<A: Authenticator, C: Clock> TokenCache<A, C> {
    pub fn new(authenticator: A, clock: C, config: TokenCacheConfig) -> Self {
        info!(
            refresh_skew_s = config.refresh_skew.as_secs(),
            acquisition_timeout_ms = config.acquisition_timeout.as_millis() as u64,
            max_reauth_fallbacks = config.max_reauth_fallbacks,
            grace_period_s = config.grace_period.as_secs(),
            "token cache initialized"
        );
        Self {
            inner: Arc::new(Inner {
                authenticator,
                clock,
                config,
                entries: RwLock::new(HashMap::new()),
                next_acquisition_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &TokenCacheConfig {
        &self.inner.config
    }

    pub fn authenticator(&self) -> &A {
        &self.inner.authenticator
    }

    /// Returns a currently valid access token and its expiry.
    ///
    /// `force_refresh` skips a cached token that still looks valid, e.g. after a
    /// resource server answered 401.
    pub async fn get_token(
        &self,
        identity: &CredentialIdentity,
        force_refresh: bool,
    ) -> Result<AccessToken, TokenError> {
        self.resolve(identity, force_refresh, None)
            .await
            .map(|record| record.to_access_token())
    }

    /// Like [`get_token`](Self::get_token), but gives up with
    /// [`TokenError::Cancelled`] once `cancel` fires. The acquisition itself
    /// keeps running for the other waiters.
    pub async fn get_token_with_cancel(
        &self,
        identity: &CredentialIdentity,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError> {
        self.resolve(identity, force_refresh, Some(cancel))
            .await
            .map(|record| record.to_access_token())
    }

    /// Same as [`get_token`](Self::get_token) but returns the whole shared record.
    pub async fn get_record(
        &self,
        identity: &CredentialIdentity,
        force_refresh: bool,
    ) -> Result<Arc<TokenRecord>, TokenError> {
        self.resolve(identity, force_refresh, None).await
    }

    /// Drops the cached record so the next request re-acquires. No-op for unknown identities.
    pub async fn invalidate(&self, identity: &CredentialIdentity) {
        self.clear_entry(identity).await;
    }

    /// Invalidates locally, then ends the provider session bound to the cached refresh token.
    pub async fn logout(&self, identity: &CredentialIdentity) -> Result<(), TokenError> {
        identity.validate()?;
        let previous = self.clear_entry(identity).await;
        let refresh_token = previous
            .as_ref()
            .and_then(|record| record.refresh_token().map(str::to_owned));

        match refresh_token {
            Some(refresh_token) => {
                info!(identity = %identity, "ending provider session");
                self.inner
                    .authenticator
                    .logout(identity, &refresh_token)
                    .await
                    .map_err(TokenError::from)
            }
            None => {
                debug!(identity = %identity, "no refresh token cached, provider session left as is");
                Ok(())
            }
        }
    }

    /// Snapshot of the cached record, without triggering an acquisition.
    pub async fn peek(&self, identity: &CredentialIdentity) -> Option<Arc<TokenRecord>> {
        let entry = self.inner.entries.read().await.get(identity).cloned()?;
        let guard = entry.lock().await;
        guard.record.clone()
    }

    /// Generation counter of the identity's entry, if it exists.
    pub async fn generation(&self, identity: &CredentialIdentity) -> Option<u64> {
        let entry = self.inner.entries.read().await.get(identity).cloned()?;
        let guard = entry.lock().await;
        Some(guard.generation)
    }

    async fn clear_entry(&self, identity: &CredentialIdentity) -> Option<Arc<TokenRecord>> {
        let entry = self.inner.entries.read().await.get(identity).cloned()?;
        let previous = entry.lock().await.clear();
        if previous.is_some() {
            info!(identity = %identity, "token invalidated");
            let metrics = get_metrics().await;
            metrics.invalidations.with_label_values(&[identity.to_string().as_str()]).inc();
            let _ = metrics.token_expiry_unix.remove_label_values(&[identity.to_string().as_str()]);
        }
        previous
    }

    async fn entry(&self, identity: &CredentialIdentity) -> Arc<Mutex<CacheEntry>> {
        if let Some(entry) = self.inner.entries.read().await.get(identity) {
            return entry.clone();
        }
        self.inner
            .entries
            .write()
            .await
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    async fn resolve(
        &self,
        identity: &CredentialIdentity,
        force_refresh: bool,
        cancel: Option<&CancellationToken>,
    ) -> Outcome {
        identity.validate()?;
        let metrics = get_metrics().await;
        let label = identity.to_string();
        let entry = self.entry(identity).await;

        let receiver = {
            let mut guard = entry.lock().await;
            let now = self.inner.clock.now();
            let skew = to_chrono(self.inner.config.refresh_skew);

            if !force_refresh {
                if let Some(record) = guard.record.as_ref().filter(|r| r.is_fresh(now, skew)) {
                    metrics.token_requests.with_label_values(&[label.as_str(), OUTCOME_HIT]).inc();
                    return Ok(record.clone());
                }
            }

            match guard.in_flight.as_ref().filter(|f| f.is_alive()) {
                Some(in_flight) => {
                    debug!(identity = %identity, acquisition = in_flight.id, "joining in-flight acquisition");
                    metrics.token_requests.with_label_values(&[label.as_str(), OUTCOME_JOIN]).inc();
                    in_flight.receiver.clone()
                }
                None => {
                    metrics.token_requests.with_label_values(&[label.as_str(), OUTCOME_ACQUIRE]).inc();
                    self.spawn_acquisition(identity, &entry, &mut guard, force_refresh)
                }
            }
        };

        wait_for_outcome(receiver, cancel).await
    }

    /// Installs a fresh in-flight slot and runs the acquisition on its own task,
    /// so a waiter going away never cancels it for the others.
    fn spawn_acquisition(
        &self,
        identity: &CredentialIdentity,
        entry: &Arc<Mutex<CacheEntry>>,
        guard: &mut CacheEntry,
        force_refresh: bool,
    ) -> watch::Receiver<Option<Outcome>> {
        let (sender, receiver) = watch::channel(None);
        let acquisition_id = self.inner.next_acquisition_id.fetch_add(1, Ordering::Relaxed);
        guard.in_flight = Some(InFlight {
            id: acquisition_id,
            receiver: receiver.clone(),
        });

        let started_generation = guard.generation;
        let previous = guard.record.clone();
        let cache = self.clone();
        let identity = identity.clone();
        let entry = entry.clone();

        info!(
            identity = %identity,
            acquisition = acquisition_id,
            force_refresh,
            "starting token acquisition"
        );

        tokio::spawn(async move {
            let acquired = cache.acquire(&identity, previous.as_deref()).await;
            let outcome = cache
                .complete(&identity, &entry, acquisition_id, started_generation, acquired)
                .await;
            // nobody left waiting is fine, the record is already stored
            let _ = sender.send(Some(outcome));
        });

        receiver
    }

    /// Refresh when a live refresh token exists, otherwise authenticate.
    async fn acquire(
        &self,
        identity: &CredentialIdentity,
        previous: Option<&TokenRecord>,
    ) -> Result<TokenRecord, TokenError> {
        let now = self.inner.clock.now();
        let refresh_token = previous.and_then(|record| record.live_refresh_token(now));

        let Some(refresh_token) = refresh_token else {
            return self.exchange(identity, Grant::primary_for(identity)).await;
        };

        match self
            .exchange(identity, Grant::RefreshToken(refresh_token.to_owned()))
            .await
        {
            Err(err) if err.is_authentication_failure() && self.inner.config.max_reauth_fallbacks > 0 => {
                warn!(
                    identity = %identity,
                    error = %err,
                    "refresh rejected, falling back to full authentication"
                );
                get_metrics()
                    .await
                    .reauth_fallbacks
                    .with_label_values(&[identity.to_string().as_str()])
                    .inc();
                self.exchange(identity, Grant::primary_for(identity)).await
            }
            other => other,
        }
    }

    /// One timed call to the authenticator.
    async fn exchange(
        &self,
        identity: &CredentialIdentity,
        grant: Grant,
    ) -> Result<TokenRecord, TokenError> {
        let metrics = get_metrics().await;
        let label = identity.to_string();
        let grant_name = grant.as_str();
        let timeout = self.inner.config.acquisition_timeout;
        let start = get_instant();

        metrics.acquisitions.with_label_values(&[label.as_str(), grant_name]).inc();
        debug!(identity = %identity, grant = grant_name, "calling authenticator");

        let result = match tokio::time::timeout(
            timeout,
            self.inner.authenticator.authenticate(identity, grant),
        )
        .await
        {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(err)) => Err(TokenError::from(err)),
            Err(_) => Err(TokenError::timeout(timeout.as_millis())),
        };

        metrics
            .acquisition_duration
            .with_label_values(&[grant_name])
            .observe(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            metrics
                .acquisition_failures
                .with_label_values(&[label.as_str(), err.reason()])
                .inc();
            warn!(identity = %identity, grant = grant_name, error = %err, "acquisition failed");
        }
        result
    }

    /// Applies an acquisition result to the entry and decides what its waiters get.
    async fn complete(
        &self,
        identity: &CredentialIdentity,
        entry: &Arc<Mutex<CacheEntry>>,
        acquisition_id: u64,
        started_generation: u64,
        acquired: Result<TokenRecord, TokenError>,
    ) -> Outcome {
        let metrics = get_metrics().await;
        let label = identity.to_string();
        let mut guard = entry.lock().await;
        guard.finish(acquisition_id);

        if guard.generation != started_generation {
            // invalidated or replaced while we were out on the network
            debug!(
                identity = %identity,
                acquisition = acquisition_id,
                started_generation,
                current_generation = guard.generation,
                "discarding stale acquisition result"
            );
            return match (guard.record.clone(), acquired) {
                (Some(current), _) => Ok(current),
                (None, acquired) => acquired.map(Arc::new),
            };
        }

        match acquired {
            Ok(record) => {
                let record = Arc::new(record);
                guard.replace(record.clone());
                metrics
                    .token_expiry_unix
                    .with_label_values(&[label.as_str()])
                    .set(record.expires_at().timestamp());
                info!(
                    identity = %identity,
                    generation = guard.generation,
                    expires_at = %record.expires_at(),
                    "token stored"
                );
                Ok(record)
            }
            Err(err @ TokenError::AuthenticationFailed { .. }) => {
                guard.drop_record();
                let _ = metrics.token_expiry_unix.remove_label_values(&[label.as_str()]);
                Err(err)
            }
            Err(err @ TokenError::TransientAuthError { kind: TransientKind::Timeout, .. }) => {
                let now = self.inner.clock.now();
                let grace = to_chrono(self.inner.config.grace_period);
                match guard.record.as_ref().filter(|r| r.is_within_grace(now, grace)) {
                    Some(previous) => {
                        warn!(
                            identity = %identity,
                            expires_at = %previous.expires_at(),
                            "provider timed out, serving previous token within grace period"
                        );
                        metrics.token_requests.with_label_values(&[label.as_str(), OUTCOME_GRACE]).inc();
                        Ok(previous.clone())
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

async fn wait_for_outcome(
    mut receiver: watch::Receiver<Option<Outcome>>,
    cancel: Option<&CancellationToken>,
) -> Outcome {
    let settled = async move {
        let published = receiver
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone());
        match published {
            Ok(Some(outcome)) => outcome,
            _ => Err(TokenError::TransientAuthError {
                kind: TransientKind::Network,
                message: "acquisition aborted before publishing a result".into(),
            }),
        }
    };

    match cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TokenError::Cancelled),
                outcome = settled => outcome,
            }
        }
        None => settled.await,
    }
}
