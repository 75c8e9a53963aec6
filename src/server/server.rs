use anyhow::{Context, Result};
use axum::Router;
use tracing::info;
use crate::config::settings::SettingsConfig;
use crate::observability::metrics::{get_metrics, Metrics};
use crate::observability::routes::MetricsState;
use crate::server::token_routes::TokenRouteState;
use crate::utils::config_loader::{AgentTokenCache, IdentityNames};

#[derive(Clone)]
pub struct AppState {
    pub metrics_state: MetricsState,
    pub token_state: TokenRouteState,
}

impl AppState {
    pub fn new (
        metrics: &Metrics,
        cache: AgentTokenCache,
        identities: IdentityNames,
    ) -> Self{
        Self {
            metrics_state: MetricsState::new(metrics.registry.clone()),
            token_state: TokenRouteState::new(cache, identities),
        }
    }
}

/// Token and metrics routes bound to their state.
pub fn router(settings_config: &SettingsConfig, state: AppState) -> Router {
    Router::new()
        .merge(state.metrics_state.router(&settings_config.metrics))
        .merge(state.token_state.router())
        .with_state(state)
}

/// Start one Axum server serving cached tokens and metrics.
pub async fn start(
    settings_config: &SettingsConfig,
    cache: AgentTokenCache,
    identities: IdentityNames,
) -> Result<()> {
    let metrics = get_metrics().await;
    let state = AppState::new(metrics, cache, identities);
    let app = router(settings_config, state);

    let bind_addr = format!("{}:{}", settings_config.server.host, settings_config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", bind_addr))?;
    info!(address = bind_addr.as_str(), "server listening");
    metrics.up.set(1);
    axum::serve(listener, app).await.context("server failed")?;

    Ok(())
}
