/// OAuth2 authorization-server endpoints
///
/// Token responses, successful or not, carry `Cache-Control: no-store` and
/// `Pragma: no-cache` and use the standard envelope instead of the raw
/// OAuth2 error shape.
use crate::{
    api::middleware::{extract_bearer_token, Principal},
    context::AppContext,
    db::UserRepository,
    error::{LinkError, LinkResult},
    oauth::{AuthorizeRequest, TokenRequest, TokenResponse, GRANT_REFRESH_TOKEN},
    response::{ok, ApiResponse},
};
use axum::{
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, LOCATION, PRAGMA},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Build OAuth2 routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/oauth2/authorize", get(authorize))
        .route("/oauth2/token", post(token))
        .route("/oauth2/refresh", post(refresh))
        .route("/oauth2/createClient", post(create_client))
        .route("/oauth2/userinfo", get(userinfo))
}

#[derive(Debug, Deserialize)]
pub struct CreateClientForm {
    #[serde(default)]
    pub redirect_uri: String,
}

#[derive(Debug, Serialize)]
pub struct CreateClientResponse {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Serialize)]
pub struct OAuthUserInfo {
    pub user_id: String,
    pub email: String,
    pub nickname: String,
    pub scope: String,
}

fn no_store(result: LinkResult<Json<ApiResponse<TokenResponse>>>) -> Response {
    if let Err(e) = &result {
        // Internal errors are logged when rendered
        if !e.is_internal() {
            warn!(error = %e, code = e.code(), "token endpoint error");
        }
    }
    let mut response = result.into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Redirect the authenticated owner back to the client with a code
async fn authorize(
    State(ctx): State<AppContext>,
    principal: Principal,
    Query(req): Query<AuthorizeRequest>,
) -> LinkResult<Response> {
    let target = ctx.oauth.authorize(&req, Some(&principal.username)).await?;
    let location = HeaderValue::from_str(&target).map_err(|_| LinkError::InvalidRedirectUri)?;
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}

async fn token(State(ctx): State<AppContext>, Form(req): Form<TokenRequest>) -> Response {
    no_store(ctx.oauth.token(&req).await.map(ok))
}

/// Same engine as `/oauth2/token`; the grant defaults to `refresh_token`
async fn refresh(State(ctx): State<AppContext>, Form(mut req): Form<TokenRequest>) -> Response {
    if req.grant_type.is_empty() {
        req.grant_type = GRANT_REFRESH_TOKEN.to_string();
    }
    no_store(ctx.oauth.token(&req).await.map(ok))
}

async fn create_client(
    State(ctx): State<AppContext>,
    principal: Principal,
    Form(form): Form<CreateClientForm>,
) -> LinkResult<Json<ApiResponse<CreateClientResponse>>> {
    let client = ctx
        .oauth
        .create_client(principal.user_id, &form.redirect_uri)
        .await?;
    Ok(ok(CreateClientResponse {
        client_id: client.id,
        client_secret: client.secret,
        redirect_uri: client.domain,
    }))
}

/// Resource-owner info for a bearer OAuth2 access token
async fn userinfo(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> LinkResult<Json<ApiResponse<OAuthUserInfo>>> {
    let access = extract_bearer_token(&headers).unwrap_or_default();
    let grant = ctx.oauth.validate_bearer(&access).await?;
    let user = ctx
        .db
        .user_by_uid(&grant.user_id)
        .await?
        .ok_or(LinkError::UserNotFound)?;
    let nickname = ctx
        .db
        .profile(user.id)
        .await?
        .map(|profile| profile.nickname)
        .unwrap_or_else(|| user.uid.clone());

    Ok(ok(OAuthUserInfo {
        user_id: user.uid,
        email: user.email,
        nickname,
        scope: grant.scope,
    }))
}
