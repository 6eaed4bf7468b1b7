/// External identity-provider login and binding
///
/// `/login/{idp}` sends the browser to the provider with a one-time state.
/// The callback either logs in the account bound to the external identity,
/// or parks the identity under a random key and hands back an
/// `oauth-check-email-ticket` naming that key. A signed-in user then binds
/// it with `/login/{idp}/bind`.
use crate::{
    account::ACCESS_TOKEN_COOKIE,
    api::{cookie_value, middleware::Principal, set_cookie},
    cache::{categories, KvStore},
    context::AppContext,
    credential::Purpose,
    db::{BindingRepository, IdpBinding, UserRepository},
    error::{LinkError, LinkResult},
    idp::{exchange_for, IdentityProvider, IdpUserInfo},
    response::{ok, ApiResponse},
};
use axum::{
    extract::{Path, Query, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifetime of a login state and of a pending, unbound identity
const IDP_STATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Cookie carrying the pending-binding ticket
pub const OAUTH_TICKET_COOKIE: &str = "OAUTH-TICKET";

/// Build identity-provider routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/login/:idp", get(login))
        .route("/login/:idp/callback", get(callback))
        .route("/login/:idp/bind", post(bind))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct BindForm {
    #[serde(default)]
    pub ticket: String,
}

/// Callback outcome: a session for a bound identity, or a binding ticket
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CallbackResponse {
    LoggedIn { token: String },
    Unbound {
        #[serde(rename = "oauthTicket")]
        oauth_ticket: String,
        display_name: String,
        email: Option<String>,
    },
}

/// External identity waiting to be bound
#[derive(Debug, Serialize, Deserialize)]
struct PendingBinding {
    provider: String,
    info: IdpUserInfo,
}

fn find_provider<'a>(ctx: &'a AppContext, name: &str) -> LinkResult<&'a IdentityProvider> {
    ctx.identity_provider(name)
        .ok_or_else(|| LinkError::IdpNotFound(name.to_string()))
}

fn callback_url(ctx: &AppContext, provider: &IdentityProvider) -> String {
    ctx.api_url(&format!("/login/{}/callback", provider.name))
}

async fn login(State(ctx): State<AppContext>, Path(name): Path<String>) -> LinkResult<Response> {
    let provider = find_provider(&ctx, &name)?;
    let state = Uuid::new_v4().simple().to_string();
    ctx.kv
        .set(
            &format!("{}{}", categories::IDP_STATE, state),
            &provider.name,
            IDP_STATE_TTL,
        )
        .await?;

    let target = exchange_for(&provider.name, ctx.http.clone()).authorize_url(
        provider.config.oauth2(),
        &callback_url(&ctx, provider),
        &state,
    )?;
    let location = HeaderValue::from_str(&target)
        .map_err(|e| LinkError::Internal(format!("Invalid provider redirect: {}", e)))?;
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}

/// Consume the one-time state; it must have been issued for `provider`
async fn take_state(ctx: &AppContext, provider: &IdentityProvider, state: &str) -> LinkResult<()> {
    if state.is_empty() {
        return Err(LinkError::InvalidInput("state is required".to_string()));
    }
    let key = format!("{}{}", categories::IDP_STATE, state);
    let stored = ctx.kv.get(&key).await?;
    ctx.kv.delete(&key).await?;
    match stored {
        Some(name) if name == provider.name => Ok(()),
        _ => Err(LinkError::InvalidInput("unknown or expired state".to_string())),
    }
}

async fn callback(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> LinkResult<(HeaderMap, Json<ApiResponse<CallbackResponse>>)> {
    let provider = find_provider(&ctx, &name)?;
    take_state(&ctx, provider, &query.state).await?;
    if query.code.is_empty() {
        return Err(LinkError::InvalidInput("code is required".to_string()));
    }

    let setting = provider.config.oauth2();
    let exchange = exchange_for(&provider.name, ctx.http.clone());
    let token = exchange
        .exchange_token(setting, &callback_url(&ctx, provider), &query.code)
        .await?;
    let info = exchange
        .user_info(setting, &token)
        .await?
        .ok_or_else(|| LinkError::Upstream(format!("{} returned no identity", provider.name)))?;

    if let Some(binding) = ctx.db.binding(&provider.name, &info.identifier).await? {
        let user = ctx
            .db
            .user_by_id(binding.user_id)
            .await?
            .ok_or(LinkError::UserNotFound)?;
        let token = ctx
            .accounts
            .issue_access_token(&user, &format!("idp:{}", provider.name))
            .await?;
        info!(provider = %provider.name, uid = %user.uid, "user logged in through identity provider");
        return Ok((
            set_cookie(
                ACCESS_TOKEN_COOKIE,
                &token,
                Some(ctx.config.authentication.access_token_ttl),
            ),
            ok(CallbackResponse::LoggedIn { token }),
        ));
    }

    let key = Uuid::new_v4().simple().to_string();
    let pending = PendingBinding {
        provider: provider.name.clone(),
        info,
    };
    let value = serde_json::to_string(&pending)
        .map_err(|e| LinkError::Internal(format!("Failed to encode pending binding: {}", e)))?;
    ctx.kv
        .set(
            &format!("{}{}", categories::IDP_PENDING, key),
            &value,
            IDP_STATE_TTL,
        )
        .await?;
    let ticket = ctx
        .codec
        .issue(&key, Purpose::OAuthCheckEmailTicket, IDP_STATE_TTL)?;

    debug!(provider = %provider.name, identifier = %pending.info.identifier, "external identity not bound");
    Ok((
        set_cookie(OAUTH_TICKET_COOKIE, &ticket, None),
        ok(CallbackResponse::Unbound {
            oauth_ticket: ticket,
            display_name: pending.info.display_name,
            email: pending.info.email,
        }),
    ))
}

/// Bind the pending external identity to the signed-in caller
async fn bind(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    principal: Principal,
    jar: CookieJar,
    Form(form): Form<BindForm>,
) -> LinkResult<Json<ApiResponse<()>>> {
    let provider = find_provider(&ctx, &name)?;
    let ticket = if form.ticket.is_empty() {
        cookie_value(&jar, OAUTH_TICKET_COOKIE)
    } else {
        form.ticket
    };
    if ticket.is_empty() {
        return Err(LinkError::TicketNotFound);
    }
    let key = ctx
        .codec
        .identity_for(&ticket, Purpose::OAuthCheckEmailTicket)
        .map_err(LinkError::into_ticket_error)?;

    let pending_key = format!("{}{}", categories::IDP_PENDING, key);
    let raw = ctx
        .kv
        .get(&pending_key)
        .await?
        .ok_or(LinkError::TicketNotFound)?;
    let pending: PendingBinding = serde_json::from_str(&raw)
        .map_err(|e| LinkError::Internal(format!("Corrupt pending binding: {}", e)))?;
    if pending.provider != provider.name {
        return Err(LinkError::InvalidInput(format!(
            "ticket was issued for {}",
            pending.provider
        )));
    }

    // An external identity belongs to one account at a time
    if let Some(existing) = ctx
        .db
        .binding(&pending.provider, &pending.info.identifier)
        .await?
    {
        if existing.user_id != principal.user_id {
            warn!(provider = %provider.name, identifier = %pending.info.identifier, "external identity already bound to another account");
            return Err(LinkError::AccessDenied);
        }
    }

    ctx.db
        .upsert_binding(IdpBinding {
            provider: pending.provider,
            union_id: pending.info.identifier.clone(),
            user_id: principal.user_id,
            info: pending.info.raw.to_string(),
        })
        .await?;
    ctx.kv.delete(&pending_key).await?;

    info!(provider = %provider.name, uid = %principal.username, identifier = %pending.info.identifier, "external identity bound");
    Ok(Json(ApiResponse::empty()))
}
