/// Verification flow endpoints: account check, code mail, code check
use crate::{
    api::{cookie_value, set_cookie},
    context::AppContext,
    error::{LinkError, LinkResult},
    response::{ok, ApiResponse},
    verification::FlowFlag,
};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Build verification routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/verify/account", get(verify_account))
        .route("/sendEmail", get(send_email))
        .route("/verify/verifyCode", post(verify_code))
}

#[derive(Debug, Deserialize)]
pub struct VerifyAccountQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub flag: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketQuery {
    #[serde(default)]
    pub ticket: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeForm {
    #[serde(default)]
    pub verify_code: String,
    #[serde(default)]
    pub ticket: String,
}

/// Candidate tickets of an email-verified flow: the explicit value alone, or
/// every flow cookie present
fn candidate_tickets(explicit: &str, jar: &CookieJar) -> Vec<String> {
    if !explicit.is_empty() {
        return vec![explicit.to_string()];
    }
    [FlowFlag::Register, FlowFlag::ResetPassword]
        .iter()
        .map(|flag| cookie_value(jar, flag.cookie_name()))
        .filter(|ticket| !ticket.is_empty())
        .collect()
}

/// Pick the ticket of the flow in progress
///
/// A browser can carry cookies of several flows; the first one whose ticket
/// still has an open phase wins. When none is open the first candidate is
/// used so the caller gets that ticket's own error.
async fn email_flow_ticket(ctx: &AppContext, explicit: &str, jar: &CookieJar) -> LinkResult<String> {
    let candidates = candidate_tickets(explicit, jar);
    for ticket in &candidates {
        if ctx.accounts.ticket_is_open(ticket).await? {
            return Ok(ticket.clone());
        }
    }
    Ok(candidates.into_iter().next().unwrap_or_default())
}

/// Issue a phase-0 ticket for `username` in the flow selected by `flag`
async fn verify_account(
    State(ctx): State<AppContext>,
    Query(query): Query<VerifyAccountQuery>,
) -> LinkResult<(HeaderMap, Json<ApiResponse<Value>>)> {
    if query.username.trim().is_empty() {
        return Err(LinkError::InvalidInput("username is required".to_string()));
    }
    let flag: FlowFlag = query.flag.parse()?;
    let ticket = ctx.accounts.verify_account(&query.username, flag).await?;

    let mut data = Map::new();
    data.insert(flag.response_key().to_string(), Value::String(ticket.clone()));
    Ok((
        set_cookie(flag.cookie_name(), &ticket, None),
        ok(Value::Object(data)),
    ))
}

async fn send_email(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Query(query): Query<TicketQuery>,
) -> LinkResult<Json<ApiResponse<()>>> {
    let ticket = email_flow_ticket(&ctx, &query.ticket, &jar).await?;
    ctx.accounts.send_email(&ticket).await?;
    Ok(Json(ApiResponse::empty()))
}

async fn verify_code(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Form(form): Form<VerifyCodeForm>,
) -> LinkResult<Json<ApiResponse<()>>> {
    let ticket = email_flow_ticket(&ctx, &form.ticket, &jar).await?;
    ctx.accounts
        .check_verify_code(&ticket, &form.verify_code)
        .await?;
    Ok(Json(ApiResponse::empty()))
}
