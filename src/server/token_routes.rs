use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::TokenError;
use crate::server::server::AppState;
use crate::utils::config_loader::{AgentTokenCache, IdentityNames};

#[derive(Clone)]
pub struct TokenRouteState {
    pub cache: AgentTokenCache,
    pub identities: Arc<IdentityNames>,
}

impl TokenRouteState {
    pub fn new(cache: AgentTokenCache, identities: IdentityNames) -> Self {
        Self {
            cache,
            identities: Arc::new(identities),
        }
    }

    pub fn router(&self) -> Router<AppState> {
        for name in self.identities.keys() {
            info!("served path: /tokens/{}", name);
        }
        Router::new()
            .route("/tokens/{name}", get(get_token).delete(invalidate_token))
            .route("/tokens/{name}/logout", post(logout))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TokenQuery {
    #[serde(default)]
    pub force_refresh: bool,
}

async fn get_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let tokens = &state.token_state;
    let Some(identity) = tokens.identities.get(&name) else {
        return unknown_identity(&name);
    };

    match tokens.cache.get_token(identity, query.force_refresh).await {
        Ok(token) => (
            StatusCode::OK,
            Json(json!({
                "access_token": token.access_token,
                "token_type": token.token_type,
                "expires_at": token.expires_at.to_rfc3339(),
            })),
        )
            .into_response(),
        Err(err) => error_response(&name, err),
    }
}

async fn invalidate_token(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let tokens = &state.token_state;
    let Some(identity) = tokens.identities.get(&name) else {
        return unknown_identity(&name);
    };
    tokens.cache.invalidate(identity).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn logout(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let tokens = &state.token_state;
    let Some(identity) = tokens.identities.get(&name) else {
        return unknown_identity(&name);
    };
    match tokens.cache.logout(identity).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&name, err),
    }
}

fn unknown_identity(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "unknown_identity", "identity": name })),
    )
        .into_response()
}

fn error_response(name: &str, err: TokenError) -> Response {
    warn!(identity_name = name, error = %err, "token request failed");
    let status = match &err {
        TokenError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
        TokenError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
        TokenError::TransientAuthError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        TokenError::Cancelled => StatusCode::REQUEST_TIMEOUT,
    };
    (
        status,
        Json(json!({
            "error": err.reason(),
            "provider_code": err.provider_code(),
            "message": err.to_string(),
            "retryable": err.is_retryable(),
        })),
    )
        .into_response()
}
