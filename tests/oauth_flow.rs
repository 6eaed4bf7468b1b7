/// End-to-end tests of the embedded OAuth2 authorization server
mod common;

use axum::http::{header, StatusCode};
use chrono::{Duration as ChronoDuration, Utc};
use common::TestApp;
use sast_link::{
    db::{NewOAuthToken, OAuthTokenRepository, TokenColumn},
    oauth::TokenInfo,
};

const UID: &str = "b22010201";
const PASSWORD: &str = "passw0rd1";
const REDIRECT: &str = "https://app.example.com/callback";

struct Client {
    id: String,
    secret: String,
}

async fn setup() -> (TestApp, String, Client) {
    let app = TestApp::new();
    app.register(UID, PASSWORD).await;
    let token = app.login(UID, PASSWORD).await;

    let res = app
        .post_form(
            "/api/v1/oauth2/createClient",
            &[("redirect_uri", REDIRECT)],
            None,
            Some(token.as_str()),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let client = Client {
        id: res.data_str("client_id"),
        secret: res.data_str("client_secret"),
    };
    assert_eq!(client.secret.len(), 32);
    (app, token, client)
}

/// Run the authorize step and return the code from the redirect
async fn authorize(app: &TestApp, token: &str, client: &Client) -> String {
    let uri = format!(
        "/api/v1/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&state=xyz",
        client.id, REDIRECT
    );
    let res = app.get(&uri, None, Some(token)).await;
    assert_eq!(res.status, StatusCode::FOUND, "{}", res.body);

    let location = reqwest::Url::parse(&res.header(header::LOCATION)).unwrap();
    assert_eq!(location.host_str(), Some("app.example.com"));
    let pairs: Vec<(String, String)> = location.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
    pairs
        .into_iter()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v)
        .unwrap()
}

#[tokio::test]
async fn test_authorize_requires_signed_in_owner() {
    let (app, _, client) = setup().await;
    let uri = format!(
        "/api/v1/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}",
        client.id, REDIRECT
    );
    let res = app.get(&uri, None, None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_code_exchange_userinfo_and_refresh() {
    let (app, token, client) = setup().await;
    let code = authorize(&app, &token, &client).await;

    let res = app
        .post_form(
            "/api/v1/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", REDIRECT),
                ("client_id", client.id.as_str()),
                ("client_secret", client.secret.as_str()),
            ],
            None,
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.header(header::CACHE_CONTROL), "no-store");
    assert_eq!(res.header(header::PRAGMA), "no-cache");
    let access = res.data_str("access_token");
    let refresh = res.data_str("refresh_token");
    assert_eq!(res.data_str("token_type"), "Bearer");

    let res = app
        .get("/api/v1/oauth2/userinfo", None, Some(access.as_str()))
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.data_str("user_id"), UID);

    // Refresh rotates both tokens
    let res = app
        .post_form(
            "/api/v1/oauth2/refresh",
            &[("refresh_token", refresh.as_str())],
            None,
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let new_access = res.data_str("access_token");
    assert_ne!(new_access, access);

    let res = app
        .get("/api/v1/oauth2/userinfo", None, Some(access.as_str()))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    let res = app
        .get("/api/v1/oauth2/userinfo", None, Some(new_access.as_str()))
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let res = app
        .post_form(
            "/api/v1/oauth2/refresh",
            &[("refresh_token", refresh.as_str())],
            None,
            None,
        )
        .await;
    assert_eq!(res.err_code(), 50002);
}

#[tokio::test]
async fn test_code_is_single_use_and_errors_are_not_cached() {
    let (app, token, client) = setup().await;
    let code = authorize(&app, &token, &client).await;
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", client.id.as_str()),
        ("client_secret", client.secret.as_str()),
    ];

    let first = app.post_form("/api/v1/oauth2/token", &form, None, None).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = app.post_form("/api/v1/oauth2/token", &form, None, None).await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(second.err_code(), 50003);
    assert_eq!(second.header(header::CACHE_CONTROL), "no-store");
    assert_eq!(second.header(header::PRAGMA), "no-cache");
}

#[tokio::test]
async fn test_wrong_client_secret_is_rejected() {
    let (app, token, client) = setup().await;
    let code = authorize(&app, &token, &client).await;

    let res = app
        .post_form(
            "/api/v1/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", client.id.as_str()),
                ("client_secret", "wrong"),
            ],
            None,
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.err_code(), 50001);
}

#[tokio::test]
async fn test_foreign_redirect_is_rejected() {
    let (app, token, client) = setup().await;
    let uri = format!(
        "/api/v1/oauth2/authorize?response_type=code&client_id={}&redirect_uri=https://evil.example.org/cb",
        client.id
    );
    let res = app.get(&uri, None, Some(token.as_str())).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.err_code(), 50007);
}

#[tokio::test]
async fn test_gc_sweeps_only_expired_rows() {
    let app = TestApp::new();
    let expired = TokenInfo {
        client_id: "c".to_string(),
        user_id: UID.to_string(),
        access: "old-access".to_string(),
        ..Default::default()
    };
    app.db
        .insert_token_at(
            NewOAuthToken {
                expired_at: Utc::now() - ChronoDuration::seconds(1),
                code: String::new(),
                access: expired.access.clone(),
                refresh: String::new(),
                data: serde_json::to_string(&expired).unwrap(),
            },
            Utc::now() - ChronoDuration::hours(3),
        )
        .await;
    app.db
        .insert_token(NewOAuthToken {
            expired_at: Utc::now() + ChronoDuration::hours(1),
            code: String::new(),
            access: "live-access".to_string(),
            refresh: String::new(),
            data: "{}".to_string(),
        })
        .await
        .unwrap();

    let swept = app.ctx.oauth.tokens().sweep_expired().await.unwrap();
    assert_eq!(swept, 1);
    assert_eq!(app.db.token_count().await, 1);
    assert!(app
        .db
        .token_by(TokenColumn::Access, "live-access")
        .await
        .unwrap()
        .is_some());
}
