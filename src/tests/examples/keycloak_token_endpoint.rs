#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::Result;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::{json, Value};

    use crate::auth::identity::CredentialIdentity;
    use crate::auth::keycloak::{ClientSecrets, KeycloakAuthenticator};
    use crate::cache::token_cache::TokenCache;
    use crate::connection::ConnectionOptions;
    use crate::error::{TokenError, TransientKind};
    use crate::helpers::time::{seconds, ManualClock};
    use crate::observability::metrics::get_metrics;
    use crate::server::server::{router, AppState};
    use crate::tests::common::{build_reqwest_client, spawn_axum, test_config};
    use crate::utils::config_loader::build_token_cache;
    use crate::ServiceConfig;

    const SERVICE_TOKEN_PATH: &str = "/realms/apps/protocol/openid-connect/token";
    const USER_TOKEN_PATH: &str = "/realms/master/protocol/openid-connect/token";
    const USER_LOGOUT_PATH: &str = "/realms/master/protocol/openid-connect/logout";

    type MockedCache = TokenCache<KeycloakAuthenticator<ManualClock>, ManualClock>;

    fn mocked_cache(server: &MockServer) -> Result<(MockedCache, ManualClock, CredentialIdentity, CredentialIdentity)> {
        let clock = ManualClock::at_epoch();
        let mut authenticator = KeycloakAuthenticator::with_clock(ConnectionOptions::default(), clock.clone());

        let service = CredentialIdentity::client_credentials(server.base_url(), "apps", "backend");
        authenticator.register(
            service.clone(),
            ClientSecrets { client_secret: Some("s3cr3t".into()), password: None },
        )?;
        let user = CredentialIdentity::password(server.base_url(), "master", "admin-cli", "admin");
        authenticator.register(
            user.clone(),
            ClientSecrets { client_secret: None, password: Some("pw".into()) },
        )?;

        Ok((TokenCache::new(authenticator, clock.clone(), test_config()), clock, service, user))
    }

    fn token_body(access: &str, refresh: Option<&str>, expires_in: i64) -> Value {
        json!({
            "access_token": access,
            "expires_in": expires_in,
            "refresh_token": refresh,
            "refresh_expires_in": if refresh.is_some() { 1800 } else { 0 },
            "token_type": "bearer",
            "scope": "profile email",
        })
    }

    #[tokio::test]
    async fn client_credentials_token_is_fetched_once_and_cached() -> Result<()> {
        let server = MockServer::start_async().await;
        let token_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(SERVICE_TOKEN_PATH)
                    .form_urlencoded_tuple("grant_type", "client_credentials")
                    .form_urlencoded_tuple("client_id", "backend")
                    .form_urlencoded_tuple("client_secret", "s3cr3t");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(token_body("cc-token", None, 300));
            })
            .await;
        let (cache, _clock, service, _user) = mocked_cache(&server)?;

        let token = cache.get_token(&service, false).await?;
        assert_eq!(token.access_token, "cc-token");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_at.timestamp(), 300);
        assert_eq!(token.bearer_header(), "Bearer cc-token");

        let record = cache.get_record(&service, false).await?;
        assert_eq!(record.scope(), Some("profile email"));
        assert_eq!(record.refresh_token(), None);
        assert_eq!(token_mock.hits_async().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn password_token_is_refreshed_with_refresh_grant() -> Result<()> {
        let server = MockServer::start_async().await;
        let password_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(USER_TOKEN_PATH)
                    .form_urlencoded_tuple("grant_type", "password")
                    .form_urlencoded_tuple("username", "admin")
                    .form_urlencoded_tuple("password", "pw");
                then.status(200).json_body(token_body("pw-token", Some("rt-1"), 60));
            })
            .await;
        let refresh_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(USER_TOKEN_PATH)
                    .form_urlencoded_tuple("grant_type", "refresh_token")
                    .form_urlencoded_tuple("refresh_token", "rt-1");
                then.status(200).json_body(token_body("refreshed", Some("rt-2"), 60));
            })
            .await;
        let (cache, clock, _service, user) = mocked_cache(&server)?;

        assert_eq!(cache.get_token(&user, false).await?.access_token, "pw-token");
        clock.advance(seconds(55));
        assert_eq!(cache.get_token(&user, false).await?.access_token, "refreshed");

        assert_eq!(password_mock.hits_async().await, 1);
        assert_eq!(refresh_mock.hits_async().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn inactive_session_falls_back_to_password_grant() -> Result<()> {
        let server = MockServer::start_async().await;
        let password_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(USER_TOKEN_PATH)
                    .form_urlencoded_tuple("grant_type", "password");
                then.status(200).json_body(token_body("pw-token", Some("rt-1"), 60));
            })
            .await;
        let refresh_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(USER_TOKEN_PATH)
                    .form_urlencoded_tuple("grant_type", "refresh_token");
                then.status(400).json_body(json!({
                    "error": "invalid_grant",
                    "error_description": "Session not active"
                }));
            })
            .await;
        let (cache, clock, _service, user) = mocked_cache(&server)?;

        cache.get_token(&user, false).await?;
        clock.advance(seconds(55));
        assert_eq!(cache.get_token(&user, false).await?.access_token, "pw-token");

        assert_eq!(refresh_mock.hits_async().await, 1);
        assert_eq!(password_mock.hits_async().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn offline_refresh_token_never_expires() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(USER_TOKEN_PATH);
                then.status(200).json_body(json!({
                    "access_token": "offline-access",
                    "expires_in": 60,
                    "refresh_token": "offline-rt",
                    "refresh_expires_in": 0,
                    "token_type": "Bearer"
                }));
            })
            .await;
        let (cache, _clock, _service, user) = mocked_cache(&server)?;

        let record = cache.get_record(&user, false).await?;
        assert_eq!(record.refresh_token(), Some("offline-rt"));
        assert_eq!(record.refresh_expires_at(), None);
        Ok(())
    }

    #[tokio::test]
    async fn provider_errors_are_classified() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(SERVICE_TOKEN_PATH);
                then.status(401).json_body(json!({
                    "error": "unauthorized_client",
                    "error_description": "Invalid client or Invalid client credentials"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(USER_TOKEN_PATH);
                then.status(503).body("<html>Service Unavailable</html>");
            })
            .await;
        let (cache, _clock, service, user) = mocked_cache(&server)?;

        let err = cache.get_token(&service, false).await.unwrap_err();
        assert_eq!(
            err,
            TokenError::AuthenticationFailed {
                code: "unauthorized_client".into(),
                description: Some("Invalid client or Invalid client credentials".into()),
            }
        );

        let err = cache.get_token(&user, false).await.unwrap_err();
        assert!(matches!(err, TokenError::TransientAuthError { kind: TransientKind::Server, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn logout_posts_refresh_token_to_logout_endpoint() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(USER_TOKEN_PATH);
                then.status(200).json_body(token_body("pw-token", Some("rt-1"), 60));
            })
            .await;
        let logout_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(USER_LOGOUT_PATH)
                    .form_urlencoded_tuple("client_id", "admin-cli")
                    .form_urlencoded_tuple("refresh_token", "rt-1");
                then.status(204);
            })
            .await;
        let (cache, _clock, _service, user) = mocked_cache(&server)?;

        cache.get_token(&user, false).await?;
        cache.logout(&user).await?;

        assert_eq!(logout_mock.hits_async().await, 1);
        assert!(cache.peek(&user).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unregistered_identity_is_an_authentication_failure() -> Result<()> {
        let server = MockServer::start_async().await;
        let (cache, _clock, _service, _user) = mocked_cache(&server)?;
        let stranger = CredentialIdentity::client_credentials(server.base_url(), "apps", "stranger");

        let err = cache.get_token(&stranger, false).await.unwrap_err();
        assert_eq!(err.provider_code(), Some("unregistered_identity"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn token_routes_serve_configured_identities() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(SERVICE_TOKEN_PATH)
                    .form_urlencoded_tuple("client_id", "backend");
                then.status(200).json_body(token_body("served", None, 300));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(SERVICE_TOKEN_PATH)
                    .form_urlencoded_tuple("client_id", "revoked");
                then.status(401).json_body(json!({ "error": "unauthorized_client" }));
            })
            .await;

        let content = format!(
            r#"
settings:
  metrics:
    is_enabled: true
identities:
  backend:
    issuer: {issuer}
    realm: apps
    client_id: backend
    client_secret: s3cr3t
    grant:
      type: client_credentials
  revoked:
    issuer: {issuer}
    realm: apps
    client_id: revoked
    client_secret: old
    grant:
      type: client_credentials
"#,
            issuer = server.base_url()
        );
        let service_config: ServiceConfig = serde_yaml::from_str(&content)?;
        let (cache, identities) = build_token_cache(&service_config)?;
        let state = AppState::new(get_metrics().await, cache, identities);
        let (_handle, addr) = spawn_axum(router(&service_config.settings, state)).await;
        let client = build_reqwest_client();
        let base = format!("http://{}", addr);

        let response = client.get(format!("{base}/tokens/backend")).send().await?;
        assert_eq!(response.status(), 200);
        let body: HashMap<String, Value> = response.json().await?;
        assert_eq!(body["access_token"], "served");
        assert_eq!(body["token_type"], "Bearer");
        assert!(body["expires_at"].is_string());

        let response = client
            .get(format!("{base}/tokens/backend?force_refresh=true"))
            .send()
            .await?;
        assert_eq!(response.status(), 200);

        let response = client.get(format!("{base}/tokens/missing")).send().await?;
        assert_eq!(response.status(), 404);

        let response = client.get(format!("{base}/tokens/revoked")).send().await?;
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await?;
        assert_eq!(body["error"], "authentication_failed");
        assert_eq!(body["provider_code"], "unauthorized_client");
        assert_eq!(body["retryable"], false);

        let response = client.delete(format!("{base}/tokens/backend")).send().await?;
        assert_eq!(response.status(), 204);

        // no refresh token cached for client credentials, logout is local only
        let response = client.post(format!("{base}/tokens/backend/logout")).send().await?;
        assert_eq!(response.status(), 204);

        let response = client.get(format!("{base}/metrics")).send().await?;
        assert_eq!(response.status(), 200);
        let text = response.text().await?;
        assert!(text.contains("kctokenagent_token_requests_total"));
        Ok(())
    }
}
