/// Embedded OAuth2 authorization server
///
/// Authorization-code grant with optional PKCE and refresh-token rotation,
/// backed by relational client/token rows and a write-through token cache.
mod client_store;
mod models;
mod server;
mod token_store;

pub use client_store::ClientStore;
pub use models::{OAuthClient, TokenInfo, TokenResponse};
pub use server::{
    validate_redirect_uri, verify_pkce, AuthorizationServer, AuthorizeRequest, TokenRequest,
    GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN,
};
pub use token_store::TokenStore;
