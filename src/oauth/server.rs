use crate::{
    config::OAuthServerConfig,
    error::{LinkError, LinkResult},
    oauth::{ClientStore, OAuthClient, TokenInfo, TokenResponse, TokenStore},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng, RngCore};
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CLIENT_SECRET_LEN: usize = 32;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Query of `GET /oauth2/authorize`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
}

/// Form of `POST /oauth2/token` and `POST /oauth2/refresh`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub code_verifier: String,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_SECRET_LEN)
        .map(char::from)
        .collect()
}

fn parse_http_url(raw: &str) -> LinkResult<Url> {
    let url = Url::parse(raw).map_err(|_| LinkError::InvalidRedirectUri)?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(LinkError::InvalidRedirectUri),
    }
}

/// Host of a registered client domain, which may be stored with or without a scheme
fn registered_host(domain: &str) -> Option<String> {
    let candidate = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    };
    Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
}

/// Accept `redirect` when its host is the registered host or a subdomain of it
pub fn validate_redirect_uri(domain: &str, redirect: &str) -> LinkResult<Url> {
    let url = parse_http_url(redirect)?;
    let base = registered_host(domain).ok_or(LinkError::InvalidRedirectUri)?;
    let host = url.host_str().map(str::to_lowercase).unwrap_or_default();
    if host == base || host.ends_with(&format!(".{}", base)) {
        Ok(url)
    } else {
        Err(LinkError::InvalidRedirectUri)
    }
}

/// Check a PKCE verifier against the stored challenge
pub fn verify_pkce(challenge: &str, method: &str, verifier: &str) -> bool {
    if verifier.is_empty() {
        return false;
    }
    match method {
        "S256" => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())) == challenge,
        _ => verifier == challenge,
    }
}

/// Authorization-code grant engine with refresh-token rotation
///
/// Codes are single use: the code row is removed before tokens are minted.
/// Access and refresh tokens are opaque random strings looked up through
/// the token store.
#[derive(Clone)]
pub struct AuthorizationServer {
    config: OAuthServerConfig,
    clients: ClientStore,
    tokens: TokenStore,
}

impl AuthorizationServer {
    pub fn new(config: OAuthServerConfig, clients: ClientStore, tokens: TokenStore) -> Self {
        Self {
            config,
            clients,
            tokens,
        }
    }

    pub fn clients(&self) -> &ClientStore {
        &self.clients
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Register a client owned by `user_id`
    pub async fn create_client(&self, user_id: i64, redirect_uri: &str) -> LinkResult<OAuthClient> {
        if redirect_uri.trim().is_empty() {
            return Err(LinkError::InvalidInput("redirect_uri is required".to_string()));
        }
        parse_http_url(redirect_uri.trim())?;

        let client = OAuthClient {
            id: Uuid::new_v4().to_string(),
            secret: random_secret(),
            domain: redirect_uri.trim().to_string(),
            user_id,
        };
        self.clients.create(&client).await?;

        info!(client_id = %client.id, user_id, "OAuth2 client registered");
        Ok(client)
    }

    /// Handle an authorization request for an already-authenticated owner
    ///
    /// Returns the redirect target carrying `code` and `state`.
    pub async fn authorize(
        &self,
        req: &AuthorizeRequest,
        resource_owner: Option<&str>,
    ) -> LinkResult<String> {
        if req.response_type != "code" {
            return Err(LinkError::UnsupportedResponseType);
        }
        let client = self
            .clients
            .get_by_id(&req.client_id)
            .await?
            .ok_or(LinkError::ClientInvalid)?;

        let redirect_uri = if req.redirect_uri.is_empty() {
            client.domain.clone()
        } else {
            req.redirect_uri.clone()
        };
        let mut target = validate_redirect_uri(&client.domain, &redirect_uri)?;

        let owner = resource_owner
            .filter(|owner| !owner.is_empty())
            .ok_or(LinkError::Unauthorized)?;

        let method = match (req.code_challenge.as_str(), req.code_challenge_method.as_str()) {
            ("", _) => String::new(),
            (_, "") | (_, "plain") => "plain".to_string(),
            (_, "S256") => "S256".to_string(),
            (_, other) => {
                return Err(LinkError::InvalidRequest(format!(
                    "Unsupported code_challenge_method: {}",
                    other
                )))
            }
        };

        let info = TokenInfo {
            client_id: client.id.clone(),
            user_id: owner.to_string(),
            redirect_uri: redirect_uri.clone(),
            scope: req.scope.clone(),
            code: random_token(),
            code_created_at: Utc::now().timestamp(),
            code_expires_in: self.config.code_ttl,
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: method,
            ..Default::default()
        };
        self.tokens.create(&info).await?;

        {
            let mut query = target.query_pairs_mut();
            query.append_pair("code", &info.code);
            if !req.state.is_empty() {
                query.append_pair("state", &req.state);
            }
        }

        debug!(client_id = %client.id, owner = %owner, "authorization code issued");
        Ok(target.to_string())
    }

    /// Handle a token request for either supported grant
    pub async fn token(&self, req: &TokenRequest) -> LinkResult<TokenResponse> {
        match req.grant_type.as_str() {
            GRANT_AUTHORIZATION_CODE => self.exchange_code(req).await,
            GRANT_REFRESH_TOKEN => self.refresh(req).await,
            "" => Err(LinkError::InvalidRequest("grant_type is required".to_string())),
            _ => Err(LinkError::UnsupportedGrantType),
        }
    }

    /// Authenticate the client from the form fields
    async fn client_from_form(&self, req: &TokenRequest) -> LinkResult<OAuthClient> {
        if req.client_id.is_empty() || req.client_secret.is_empty() {
            return Err(LinkError::ClientInvalid);
        }
        let client = self
            .clients
            .get_by_id(&req.client_id)
            .await?
            .ok_or(LinkError::ClientInvalid)?;
        if client.secret != req.client_secret {
            warn!(client_id = %req.client_id, "client secret mismatch");
            return Err(LinkError::ClientInvalid);
        }
        Ok(client)
    }

    async fn exchange_code(&self, req: &TokenRequest) -> LinkResult<TokenResponse> {
        let client = self.client_from_form(req).await?;
        if req.code.is_empty() {
            return Err(LinkError::InvalidRequest("code is required".to_string()));
        }

        let grant = self
            .tokens
            .get_by_code(&req.code)
            .await?
            .ok_or_else(|| LinkError::InvalidGrant("Invalid authorization code".to_string()))?;

        if grant.client_id != client.id {
            return Err(LinkError::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }
        if grant.code_expires_at() <= Utc::now() {
            self.tokens.remove_by_code(&req.code).await?;
            return Err(LinkError::InvalidGrant(
                "Authorization code expired".to_string(),
            ));
        }
        if !req.redirect_uri.is_empty() && req.redirect_uri != grant.redirect_uri {
            return Err(LinkError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        if !grant.code_challenge.is_empty()
            && !verify_pkce(
                &grant.code_challenge,
                &grant.code_challenge_method,
                &req.code_verifier,
            )
        {
            return Err(LinkError::InvalidGrant(
                "Invalid code_verifier".to_string(),
            ));
        }

        self.tokens.remove_by_code(&req.code).await?;
        self.issue_pair(&grant).await
    }

    async fn refresh(&self, req: &TokenRequest) -> LinkResult<TokenResponse> {
        if req.refresh_token.is_empty() {
            return Err(LinkError::RefreshTokenInvalid);
        }
        let current = self
            .tokens
            .get_by_refresh(&req.refresh_token)
            .await?
            .ok_or(LinkError::RefreshTokenInvalid)?;

        // The client comes from the stored record, not from the form
        let client = self
            .clients
            .get_by_id(&current.client_id)
            .await?
            .filter(|c| !c.id.is_empty() && !c.secret.is_empty())
            .ok_or(LinkError::ClientInvalid)?;
        if !req.client_id.is_empty() && req.client_id != client.id {
            return Err(LinkError::ClientInvalid);
        }

        if current.refresh_expires_at() <= Utc::now() {
            self.tokens.remove_by_refresh(&req.refresh_token).await?;
            return Err(LinkError::InvalidGrant("Refresh token expired".to_string()));
        }

        self.tokens.remove_by_access(&current.access).await?;
        self.tokens.remove_by_refresh(&current.refresh).await?;
        self.issue_pair(&current).await
    }

    /// Mint and store a fresh access/refresh pair for the grant in `from`
    async fn issue_pair(&self, from: &TokenInfo) -> LinkResult<TokenResponse> {
        let now = Utc::now().timestamp();
        let info = TokenInfo {
            client_id: from.client_id.clone(),
            user_id: from.user_id.clone(),
            redirect_uri: from.redirect_uri.clone(),
            scope: from.scope.clone(),
            access: random_token(),
            access_created_at: now,
            access_expires_in: self.config.access_token_ttl,
            refresh: random_token(),
            refresh_created_at: now,
            refresh_expires_in: self.config.refresh_token_ttl,
            ..Default::default()
        };
        self.tokens.create(&info).await?;

        debug!(client_id = %info.client_id, owner = %info.user_id, "token pair issued");
        Ok(TokenResponse {
            access_token: info.access,
            token_type: "Bearer".to_string(),
            expires_in: info.access_expires_in,
            refresh_token: Some(info.refresh),
            scope: info.scope,
        })
    }

    /// Resolve a bearer access token to its grant
    pub async fn validate_bearer(&self, access: &str) -> LinkResult<TokenInfo> {
        if access.is_empty() {
            return Err(LinkError::NoCredential);
        }
        let info = self
            .tokens
            .get_by_access(access)
            .await?
            .ok_or(LinkError::Unauthorized)?;
        if info.access_expires_at() <= Utc::now() {
            return Err(LinkError::Expired);
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryStore, db::MemoryDatabase};
    use std::sync::Arc;

    fn server() -> AuthorizationServer {
        let db = Arc::new(MemoryDatabase::new());
        let kv = Arc::new(MemoryStore::new());
        AuthorizationServer::new(
            OAuthServerConfig::default(),
            ClientStore::new(db.clone()),
            TokenStore::new(db, kv),
        )
    }

    fn code_from(redirect: &str) -> String {
        Url::parse(redirect)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_redirect_validation() {
        assert!(validate_redirect_uri("https://app.example.com", "https://app.example.com/cb").is_ok());
        assert!(validate_redirect_uri("app.example.com", "https://a.app.example.com/cb").is_ok());
        assert!(validate_redirect_uri("https://app.example.com", "https://evilapp.example.com/").is_err());
        assert!(validate_redirect_uri("https://app.example.com", "javascript:alert(1)").is_err());
    }

    #[test]
    fn test_pkce() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert!(verify_pkce(challenge, "S256", verifier));
        assert!(!verify_pkce(challenge, "S256", "wrong"));
        assert!(verify_pkce("plain-value", "plain", "plain-value"));
        assert!(!verify_pkce("plain-value", "plain", ""));
    }

    #[tokio::test]
    async fn test_client_registration() {
        let server = server();
        let client = server
            .create_client(9, "https://app.example.com/callback")
            .await
            .unwrap();
        assert_eq!(client.secret.len(), 32);
        assert!(Uuid::parse_str(&client.id).is_ok());
        assert!(server.create_client(9, "not a url").await.is_err());
    }

    #[tokio::test]
    async fn test_authorize_requires_owner_and_code_type() {
        let server = server();
        let client = server
            .create_client(1, "https://app.example.com/cb")
            .await
            .unwrap();
        let mut req = AuthorizeRequest {
            response_type: "code".to_string(),
            client_id: client.id.clone(),
            redirect_uri: "https://app.example.com/cb".to_string(),
            ..Default::default()
        };

        let err = server.authorize(&req, None).await.unwrap_err();
        assert!(matches!(err, LinkError::Unauthorized));

        req.response_type = "token".to_string();
        let err = server.authorize(&req, Some("u1")).await.unwrap_err();
        assert!(matches!(err, LinkError::UnsupportedResponseType));
    }

    #[tokio::test]
    async fn test_code_exchange_and_refresh_rotation() {
        let server = server();
        let client = server
            .create_client(1, "https://app.example.com/cb")
            .await
            .unwrap();

        let redirect = server
            .authorize(
                &AuthorizeRequest {
                    response_type: "code".to_string(),
                    client_id: client.id.clone(),
                    redirect_uri: "https://app.example.com/cb".to_string(),
                    state: "xyz".to_string(),
                    ..Default::default()
                },
                Some("u1"),
            )
            .await
            .unwrap();
        assert!(redirect.contains("state=xyz"));
        let code = code_from(&redirect);

        let token_req = TokenRequest {
            grant_type: GRANT_AUTHORIZATION_CODE.to_string(),
            code: code.clone(),
            redirect_uri: "https://app.example.com/cb".to_string(),
            client_id: client.id.clone(),
            client_secret: client.secret.clone(),
            ..Default::default()
        };
        let tokens = server.token(&token_req).await.unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(
            server.validate_bearer(&tokens.access_token).await.unwrap().user_id,
            "u1"
        );

        // Codes are single use
        let err = server.token(&token_req).await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidGrant(_)));

        let old_refresh = tokens.refresh_token.clone().unwrap();
        let refreshed = server
            .token(&TokenRequest {
                grant_type: GRANT_REFRESH_TOKEN.to_string(),
                refresh_token: old_refresh.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_ne!(refreshed.access_token, tokens.access_token);
        assert!(server.validate_bearer(&tokens.access_token).await.is_err());
        assert!(server.validate_bearer(&refreshed.access_token).await.is_ok());

        let err = server
            .token(&TokenRequest {
                grant_type: GRANT_REFRESH_TOKEN.to_string(),
                refresh_token: old_refresh,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::RefreshTokenInvalid));
    }

    #[tokio::test]
    async fn test_wrong_secret_and_grant_type() {
        let server = server();
        let client = server
            .create_client(1, "https://app.example.com/cb")
            .await
            .unwrap();

        let err = server
            .token(&TokenRequest {
                grant_type: GRANT_AUTHORIZATION_CODE.to_string(),
                code: "whatever".to_string(),
                client_id: client.id.clone(),
                client_secret: "nope".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ClientInvalid));

        let err = server
            .token(&TokenRequest {
                grant_type: "password".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::UnsupportedGrantType));
    }

    #[tokio::test]
    async fn test_pkce_enforced_on_exchange() {
        let server = server();
        let client = server
            .create_client(1, "https://app.example.com/cb")
            .await
            .unwrap();
        let redirect = server
            .authorize(
                &AuthorizeRequest {
                    response_type: "code".to_string(),
                    client_id: client.id.clone(),
                    code_challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string(),
                    code_challenge_method: "S256".to_string(),
                    ..Default::default()
                },
                Some("u1"),
            )
            .await
            .unwrap();
        let mut req = TokenRequest {
            grant_type: GRANT_AUTHORIZATION_CODE.to_string(),
            code: code_from(&redirect),
            client_id: client.id.clone(),
            client_secret: client.secret.clone(),
            code_verifier: "wrong".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            server.token(&req).await.unwrap_err(),
            LinkError::InvalidGrant(_)
        ));

        req.code_verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string();
        assert!(server.token(&req).await.is_ok());
    }
}
