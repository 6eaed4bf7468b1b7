/// API routes and handlers
pub mod idp;
pub mod middleware;
pub mod oauth;
pub mod user;
pub mod verify;

use crate::context::AppContext;
use axum::{
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    Router,
};
use axum_extra::extract::CookieJar;

/// Build API routes, relative to the API prefix
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(verify::routes())
        .merge(user::routes())
        .merge(oauth::routes())
        .merge(idp::routes())
}

/// `Set-Cookie` value for an HttpOnly cookie on `/`
///
/// Without `max_age` the cookie lives for the browser session.
pub(crate) fn cookie_header(name: &str, value: &str, max_age: Option<u64>) -> HeaderValue {
    let mut parts = vec![
        format!("{}={}", name, value),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
    ];
    if let Some(secs) = max_age {
        parts.push(format!("Max-Age={}", secs));
    }
    // Tokens are base64url/JWT text and names are fixed ASCII
    HeaderValue::from_str(&parts.join("; ")).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Headers setting a single cookie
pub(crate) fn set_cookie(name: &str, value: &str, max_age: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie_header(name, value, max_age));
    headers
}

/// Headers expiring a cookie
pub(crate) fn clear_cookie(name: &str) -> HeaderMap {
    set_cookie(name, "", Some(0))
}

/// Cookie value, empty when absent
pub(crate) fn cookie_value(jar: &CookieJar, name: &str) -> String {
    jar.get(name)
        .map(|cookie| cookie.value().to_string())
        .unwrap_or_default()
}
