pub mod authenticator;
pub mod identity;
pub mod keycloak;
pub mod token_response;
