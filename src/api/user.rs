/// Account endpoints: the terminal flow steps, login and logout
use crate::{
    account::ACCESS_TOKEN_COOKIE,
    api::{clear_cookie, cookie_value, middleware::Principal, set_cookie},
    context::AppContext,
    db::UserRepository,
    error::{LinkError, LinkResult},
    response::{ok, ApiResponse},
    verification::FlowFlag,
};
use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Build user routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/user/register", post(register))
        .route("/user/resetPassword", post(reset_password))
        .route("/user/login", post(login))
        .route("/user/logout", post(logout))
        .route("/user/info", get(user_info))
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ticket: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default, rename = "newPassword")]
    pub new_password: String,
    #[serde(default)]
    pub ticket: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub user_id: String,
    pub email: String,
    pub nickname: String,
}

/// Explicit ticket field first, then the flow's cookie
fn flow_ticket(explicit: &str, jar: &CookieJar, flag: FlowFlag) -> String {
    if explicit.is_empty() {
        cookie_value(jar, flag.cookie_name())
    } else {
        explicit.to_string()
    }
}

async fn register(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Form(form): Form<PasswordForm>,
) -> LinkResult<(HeaderMap, Json<ApiResponse<RegisterResponse>>)> {
    let ticket = flow_ticket(&form.ticket, &jar, FlowFlag::Register);
    let user = ctx.accounts.register(&ticket, &form.password).await?;
    Ok((
        clear_cookie(FlowFlag::Register.cookie_name()),
        ok(RegisterResponse {
            user_id: user.uid,
            email: user.email,
        }),
    ))
}

async fn reset_password(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Form(form): Form<ResetPasswordForm>,
) -> LinkResult<(HeaderMap, Json<ApiResponse<()>>)> {
    let ticket = flow_ticket(&form.ticket, &jar, FlowFlag::ResetPassword);
    ctx.accounts
        .reset_password(&ticket, &form.new_password)
        .await?;
    Ok((
        clear_cookie(FlowFlag::ResetPassword.cookie_name()),
        Json(ApiResponse::empty()),
    ))
}

/// Exchange a login ticket and password for an access token
///
/// The token is returned in the body and also set as an HttpOnly cookie
/// that expires with the token.
async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Form(form): Form<PasswordForm>,
) -> LinkResult<(HeaderMap, Json<ApiResponse<LoginResponse>>)> {
    let ticket = flow_ticket(&form.ticket, &jar, FlowFlag::Login);
    if form.password.is_empty() {
        return Err(LinkError::InvalidInput("password is required".to_string()));
    }
    let token = ctx.accounts.login(&ticket, &form.password).await?;

    Ok((
        set_cookie(
            ACCESS_TOKEN_COOKIE,
            &token,
            Some(ctx.config.authentication.access_token_ttl),
        ),
        ok(LoginResponse { token }),
    ))
}

async fn logout(
    State(ctx): State<AppContext>,
    principal: Principal,
) -> LinkResult<(HeaderMap, Json<ApiResponse<()>>)> {
    ctx.accounts
        .logout(principal.user_id, &principal.access_token)
        .await?;
    info!(uid = %principal.username, "user logged out");
    Ok((clear_cookie(ACCESS_TOKEN_COOKIE), Json(ApiResponse::empty())))
}

async fn user_info(
    State(ctx): State<AppContext>,
    principal: Principal,
) -> LinkResult<Json<ApiResponse<UserInfo>>> {
    let user = ctx
        .db
        .user_by_id(principal.user_id)
        .await?
        .ok_or(LinkError::UserNotFound)?;
    let nickname = ctx
        .db
        .profile(user.id)
        .await?
        .map(|profile| profile.nickname)
        .unwrap_or_else(|| user.uid.clone());

    Ok(ok(UserInfo {
        user_id: user.uid,
        email: user.email,
        nickname,
    }))
}
