/// Authentication interceptor
///
/// Every request off the allow-list must present an access token, either as
/// a bearer header or as the access-token cookie. The token is re-validated
/// on every request: signature, expiry, purpose, and membership in the
/// owner's allow-list. There is no server-side session.
use crate::{
    account::ACCESS_TOKEN_COOKIE,
    context::AppContext,
    error::{LinkError, LinkResult},
};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use tracing::debug;

/// Trusted identity of the caller, set by the interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub is_authenticated: bool,
    pub access_token: String,
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Bearer header first, then the access-token cookie; empty when neither
pub fn extract_credential(headers: &HeaderMap) -> String {
    if let Some(token) = extract_bearer_token(headers) {
        return token;
    }
    CookieJar::from_headers(headers)
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .unwrap_or_default()
}

/// Exact match, or prefix match for patterns ending in `/*`
pub fn path_allowed(allow_paths: &[String], path: &str) -> bool {
    allow_paths.iter().any(|pattern| match pattern.strip_suffix("/*") {
        Some(prefix) => path == prefix || path.starts_with(&format!("{}/", prefix)),
        None => path == pattern,
    })
}

/// Resolve a credential into a principal
pub async fn resolve_principal(ctx: &AppContext, credential: String) -> LinkResult<Principal> {
    let user = ctx.accounts.authenticate(&credential).await?;
    Ok(Principal {
        user_id: user.id,
        username: user.uid,
        is_authenticated: true,
        access_token: credential,
    })
}

/// Authenticate request and add the principal to extensions
pub async fn authenticate(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Response {
    if path_allowed(&ctx.config.authentication.allow_paths, req.uri().path()) {
        return next.run(req).await;
    }

    let credential = extract_credential(req.headers());
    match resolve_principal(&ctx, credential).await {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(e) => {
            debug!(path = %req.uri().path(), "authentication failed: {}", e);
            let internal = e.is_internal();
            let mut response = e.into_response();
            // Keep the specific err_code, but every authentication failure is a 401
            if !internal {
                *response.status_mut() = StatusCode::UNAUTHORIZED;
            }
            response
        }
    }
}

/// Handlers take the principal set by the interceptor; on allow-listed
/// routes, where the interceptor did not run, the credential is resolved
/// here instead.
#[async_trait]
impl FromRequestParts<AppContext> for Principal {
    type Rejection = LinkError;

    async fn from_request_parts(parts: &mut Parts, ctx: &AppContext) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }
        let credential = extract_credential(&parts.headers);
        if credential.is_empty() {
            return Err(LinkError::Unauthorized);
        }
        let principal = resolve_principal(ctx, credential).await?;
        parts.extensions.insert(principal.clone());
        Ok(principal)
    }
}
