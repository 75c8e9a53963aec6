#[cfg(test)]
mod tests {

    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    use serial_test::serial;

    use crate::auth::identity::GrantContext;
    use crate::config::identities::SecretValue;
    use crate::config::proc_loader::{expand_env_vars, file_to_config, parse_config};
    use crate::config::proc_validator::validate_service_config;
    use crate::config::settings::LogFormat;
    use crate::ServiceConfig;

    const MINIMAL: &str = r#"
settings: {}
identities:
  backend:
    issuer: http://127.0.0.1:8080
    realm: apps
    client_id: backend-service
    client_secret: s3cr3t
    grant:
      type: client_credentials
"#;

    #[tokio::test]
    async fn demo_config_is_valid() {
        let path = Path::new("demos/keycloak-token-agent.yaml");
        let service_config: ServiceConfig = file_to_config(path)
            .await
            .expect("demos/keycloak-token-agent.yaml must exist in repo root for tests");
        validate_service_config(&service_config).await.unwrap();

        assert_eq!(service_config.identities.len(), 2);
        let admin = service_config.identities["admin"].identity();
        assert_eq!(admin.realm(), "master");
        assert_eq!(admin.username(), Some("admin"));
        assert!(service_config.settings.metrics.is_enabled);
    }

    #[tokio::test]
    async fn minimal_config_gets_defaults() {
        let service_config = parse_config(MINIMAL.to_owned()).await.unwrap();
        let settings = &service_config.settings;

        let logging = settings.logging.as_ref().unwrap();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, LogFormat::Compact);
        assert_eq!(settings.server.port, "8099");
        assert!(!settings.metrics.is_enabled);

        let cache_config = settings.token_cache_config();
        assert_eq!(cache_config.refresh_skew, Duration::from_secs(10));
        assert_eq!(cache_config.acquisition_timeout, Duration::from_secs(10));
        assert_eq!(cache_config.max_reauth_fallbacks, 1);
        assert_eq!(cache_config.grace_period, Duration::from_secs(30));

        assert_eq!(service_config.connection.timeout_seconds, 60);
        assert!(service_config.connection.verify);
        assert_eq!(
            service_config.identities["backend"].identity().context(),
            &GrantContext::ClientCredentials
        );
    }

    #[tokio::test]
    #[serial]
    async fn config_file_is_expanded_before_parsing() {
        std::env::set_var("KTA_TEST_KC_URL", "https://sso.example.com/auth");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", MINIMAL.replace("http://127.0.0.1:8080", "${KTA_TEST_KC_URL}")).unwrap();

        let service_config = file_to_config(file.path()).await.unwrap();
        assert_eq!(
            service_config.identities["backend"].issuer,
            "https://sso.example.com/auth"
        );
        std::env::remove_var("KTA_TEST_KC_URL");

        assert!(file_to_config(Path::new("/nonexistent/agent.yaml")).await.is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "config is not valid")]
    async fn invalid_config_is_rejected() {
        let content = r#"
settings:
  max_reauth_fallbacks: 3
identities:
  backend:
    issuer: http://127.0.0.1:8080
    realm: apps
    client_id: backend-service
    grant:
      type: client_credentials
"#;
        parse_config(content.to_owned()).await.unwrap();
    }

    #[tokio::test]
    async fn validation_reports_every_problem() {
        let content = r#"
settings:
  acquisition_timeout_ms: 0
  max_reauth_fallbacks: 2
  server:
    port: "http"
  logging:
    level: loud
    format: json
connection:
  proxies:
    http://kc: "not a proxy"
identities:
  broken:
    issuer: ftp://kc
    realm: ""
    client_id: cli
    grant:
      type: password
      username: admin
      password: ""
"#;
        let service_config: ServiceConfig = serde_yaml::from_str(content).unwrap();
        let errors = validate_service_config(&service_config).await.unwrap_err();

        for expected in [
            "acquisition_timeout_ms",
            "max_reauth_fallbacks",
            "settings.server.port",
            "settings.logging.level",
            "connection.proxies",
            "http or https",
            "password must not be empty",
        ] {
            assert!(
                errors.iter().any(|e| e.contains(expected)),
                "missing '{}' in {:?}",
                expected,
                errors
            );
        }
    }

    #[tokio::test]
    async fn duplicate_identities_are_rejected() {
        let content = r#"
settings: {}
identities:
  first:
    issuer: http://kc
    realm: apps
    client_id: backend
    client_secret: a
    grant:
      type: client_credentials
  second:
    issuer: http://kc
    realm: apps
    client_id: backend
    client_secret: b
    grant:
      type: client_credentials
"#;
        let service_config: ServiceConfig = serde_yaml::from_str(content).unwrap();
        let errors = validate_service_config(&service_config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate"));
    }

    #[test]
    #[serial]
    fn env_vars_expand_with_defaults() {
        std::env::set_var("KTA_TEST_ISSUER", "https://sso.example.com");
        std::env::remove_var("KTA_TEST_MISSING");

        let expanded = expand_env_vars("issuer: ${KTA_TEST_ISSUER}\nrealm: ${KTA_TEST_MISSING:apps}\nx: ${KTA_TEST_MISSING}");
        assert_eq!(expanded, "issuer: https://sso.example.com\nrealm: apps\nx: ");

        std::env::remove_var("KTA_TEST_ISSUER");
    }

    #[test]
    #[serial]
    fn secrets_resolve_from_env_and_file() {
        std::env::set_var("KTA_TEST_SECRET", "from-env");
        let env_secret = SecretValue::FromEnv { from_env: "KTA_TEST_SECRET".into() };
        assert_eq!(env_secret.resolve().unwrap(), "from-env");
        std::env::remove_var("KTA_TEST_SECRET");
        assert!(env_secret.resolve().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let file_secret = SecretValue::FromFile {
            path: file.path().display().to_string(),
        };
        assert_eq!(file_secret.resolve().unwrap(), "from-file");

        let missing = SecretValue::FromFile { path: "/nonexistent/secret".into() };
        assert!(missing.resolve().is_err());
    }
}
