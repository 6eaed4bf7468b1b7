use crate::{
    error::{LinkError, LinkResult},
    idp::{normalize_user_info, upstream, IdpExchange, IdpUserInfo, OAuth2Setting},
};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Standard authorization-code exchange (GitHub and friends)
#[derive(Clone)]
pub struct GenericOAuth2Exchange {
    http: reqwest::Client,
}

impl GenericOAuth2Exchange {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl IdpExchange for GenericOAuth2Exchange {
    async fn exchange_token(
        &self,
        setting: &OAuth2Setting,
        redirect_url: &str,
        code: &str,
    ) -> LinkResult<String> {
        let reply: TokenReply = self
            .http
            .post(&setting.token_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_url),
                ("client_id", setting.client_id.as_str()),
                ("client_secret", setting.client_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream("oauth2", e))?
            .json()
            .await
            .map_err(|e| upstream("oauth2", e))?;

        match reply.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(LinkError::Upstream(format!(
                "token exchange rejected: {}",
                reply
                    .error_description
                    .or(reply.error)
                    .unwrap_or_else(|| "no access_token".to_string())
            ))),
        }
    }

    async fn user_info(&self, setting: &OAuth2Setting, token: &str) -> LinkResult<Option<IdpUserInfo>> {
        let raw: Value = self
            .http
            .get(&setting.user_info_url)
            .header(ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream("oauth2", e))?
            .json()
            .await
            .map_err(|e| upstream("oauth2", e))?;

        Ok(normalize_user_info(raw, &setting.field_mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idp::test_support::{serve, setting};
    use axum::{
        http::HeaderMap,
        routing::{get, post},
        Form, Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;

    async fn token(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
        if form.get("code").map(String::as_str) == Some("good") && form["client_secret"] == "csecret" {
            Json(json!({"access_token": "user-token", "token_type": "bearer"}))
        } else {
            Json(json!({"error": "bad_verification_code", "error_description": "The code is wrong"}))
        }
    }

    async fn user(headers: HeaderMap) -> Json<Value> {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer user-token") => Json(json!({"id": 7, "name": "Ada", "email": "ada@x.edu"})),
            _ => Json(json!({"message": "Bad credentials"})),
        }
    }

    #[tokio::test]
    async fn test_exchange_and_user_info() {
        let base = serve(
            Router::new()
                .route("/token", post(token))
                .route("/user", get(user)),
        )
        .await;
        let setting = setting(&base);
        let exchange = GenericOAuth2Exchange::new(reqwest::Client::new());

        let token = exchange
            .exchange_token(&setting, "https://link/cb", "good")
            .await
            .unwrap();
        assert_eq!(token, "user-token");

        let info = exchange.user_info(&setting, &token).await.unwrap().unwrap();
        assert_eq!(info.identifier, "7");
        assert_eq!(info.email.as_deref(), Some("ada@x.edu"));

        // No identifier in the reply is "no identity", not an error
        assert!(exchange.user_info(&setting, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_code_is_upstream_error() {
        let base = serve(Router::new().route("/token", post(token))).await;
        let exchange = GenericOAuth2Exchange::new(reqwest::Client::new());
        let err = exchange
            .exchange_token(&setting(&base), "https://link/cb", "bad")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Upstream(msg) if msg.contains("The code is wrong")));
    }
}
