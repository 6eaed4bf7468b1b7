//! Shared harness: the full router over in-memory backends
#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use sast_link::{
    cache::MemoryStore, config::ServerConfig, context::AppContext, db::MemoryDatabase,
    mailer::RecordingMailer, server::build_router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub ctx: AppContext,
    pub db: MemoryDatabase,
    pub kv: MemoryStore,
    pub mailer: RecordingMailer,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn err_code(&self) -> i64 {
        self.body["err_code"].as_i64().unwrap_or_default()
    }

    pub fn data_str(&self, key: &str) -> String {
        self.body["data"][key].as_str().unwrap_or_default().to_string()
    }

    pub fn header(&self, name: header::HeaderName) -> String {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::for_testing())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let db = MemoryDatabase::new();
        let kv = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let ctx = AppContext::from_parts(
            config,
            Arc::new(db.clone()),
            Arc::new(kv.clone()),
            Arc::new(mailer.clone()),
        )
        .unwrap();
        Self {
            router: build_router(ctx.clone()),
            ctx,
            db,
            kv,
            mailer,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<(&str, &str)>, bearer: Option<&str>) -> TestResponse {
        let cookies: Vec<_> = cookie.into_iter().collect();
        self.get_with_cookies(uri, &cookies, bearer).await
    }

    pub async fn get_with_cookies(
        &self,
        uri: &str,
        cookies: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> TestResponse {
        let builder = with_credentials(Request::builder().method("GET").uri(uri), cookies, bearer);
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        form: &[(&str, &str)],
        cookie: Option<(&str, &str)>,
        bearer: Option<&str>,
    ) -> TestResponse {
        let cookies: Vec<_> = cookie.into_iter().collect();
        self.post_form_with_cookies(uri, form, &cookies, bearer)
            .await
    }

    pub async fn post_form_with_cookies(
        &self,
        uri: &str,
        form: &[(&str, &str)],
        cookies: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> TestResponse {
        let body = reqwest::Url::parse_with_params("http://localhost/", form)
            .unwrap()
            .query()
            .unwrap_or_default()
            .to_string();
        let builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        let builder = with_credentials(builder, cookies, bearer);
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Walk the register flow over HTTP and return the account id
    pub async fn register(&self, uid: &str, password: &str) {
        let res = self
            .get(&format!("/api/v1/verify/account?username={}&flag=0", uid), None, None)
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        let ticket = res.data_str("registerTicket");
        let cookie = Some(("REGISTER-TICKET", ticket.as_str()));

        let res = self.get("/api/v1/sendEmail", cookie, None).await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        let code = self
            .mailer
            .last_code_for(&format!("{}@x.edu", uid))
            .await
            .unwrap();

        let res = self
            .post_form("/api/v1/verify/verifyCode", &[("verify_code", code.as_str())], cookie, None)
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);

        let res = self
            .post_form("/api/v1/user/register", &[("password", password)], cookie, None)
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    }

    /// Log in over HTTP and return the access token
    pub async fn login(&self, uid: &str, password: &str) -> String {
        let res = self
            .get(&format!("/api/v1/verify/account?username={}&flag=1", uid), None, None)
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        let ticket = res.data_str("loginTicket");

        let res = self
            .post_form(
                "/api/v1/user/login",
                &[("password", password)],
                Some(("LOGIN-TICKET", ticket.as_str())),
                None,
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        res.data_str("token")
    }
}

fn with_credentials(
    mut builder: axum::http::request::Builder,
    cookies: &[(&str, &str)],
    bearer: Option<&str>,
) -> axum::http::request::Builder {
    if !cookies.is_empty() {
        let header_value = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(header::COOKIE, header_value);
    }
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
}

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
