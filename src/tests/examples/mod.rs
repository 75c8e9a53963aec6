pub mod config_validation;
pub mod keycloak_token_endpoint;
