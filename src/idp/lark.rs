use crate::{
    error::{LinkError, LinkResult},
    idp::{normalize_user_info, upstream, IdpExchange, IdpUserInfo, OAuth2Setting},
};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_APP_TOKEN_URL: &str =
    "https://open.feishu.cn/open-apis/auth/v3/app_access_token/internal";

/// Lark replies carry their own status; HTTP 200 can still be a failure
#[derive(Debug, Deserialize)]
struct LarkReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    app_access_token: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl LarkReply {
    fn check(self, step: &str) -> LinkResult<Self> {
        if self.code != 0 {
            tracing::warn!(step, code = self.code, msg = %self.msg, "lark rejected request");
            return Err(LinkError::Upstream(format!(
                "lark {} failed: {} ({})",
                step, self.msg, self.code
            )));
        }
        Ok(self)
    }
}

/// Lark/Feishu login: app token, then user token, then user info
#[derive(Clone)]
pub struct LarkExchange {
    http: reqwest::Client,
}

impl LarkExchange {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn call(&self, request: reqwest::RequestBuilder, step: &str) -> LinkResult<LarkReply> {
        request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream("lark", e))?
            .json::<LarkReply>()
            .await
            .map_err(|e| upstream("lark", e))?
            .check(step)
    }

    /// Client-credential exchange for the app-level token
    async fn app_access_token(&self, setting: &OAuth2Setting) -> LinkResult<String> {
        let url = setting
            .app_token_url
            .as_deref()
            .unwrap_or(DEFAULT_APP_TOKEN_URL);
        let reply = self
            .call(
                self.http.post(url).json(&json!({
                    "app_id": setting.client_id,
                    "app_secret": setting.client_secret,
                })),
                "app_access_token",
            )
            .await?;

        reply
            .app_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LinkError::Upstream("lark returned no app_access_token".to_string()))
    }
}

#[async_trait]
impl IdpExchange for LarkExchange {
    fn authorize_url(&self, setting: &OAuth2Setting, redirect_url: &str, state: &str) -> LinkResult<String> {
        let mut url = Url::parse(&setting.auth_url)
            .map_err(|e| LinkError::Internal(format!("Invalid auth_url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("app_id", &setting.client_id)
            .append_pair("redirect_uri", redirect_url)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange_token(
        &self,
        setting: &OAuth2Setting,
        _redirect_url: &str,
        code: &str,
    ) -> LinkResult<String> {
        let app_token = self.app_access_token(setting).await?;
        let reply = self
            .call(
                self.http
                    .post(&setting.token_url)
                    .bearer_auth(app_token)
                    .json(&json!({
                        "grant_type": "authorization_code",
                        "code": code,
                    })),
                "access_token",
            )
            .await?;

        reply
            .data
            .as_ref()
            .and_then(|data| data.get("access_token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| LinkError::Upstream("lark returned no user access_token".to_string()))
    }

    async fn user_info(&self, setting: &OAuth2Setting, token: &str) -> LinkResult<Option<IdpUserInfo>> {
        let reply = self
            .call(
                self.http.get(&setting.user_info_url).bearer_auth(token),
                "user_info",
            )
            .await?;

        Ok(reply
            .data
            .and_then(|data| normalize_user_info(data, &setting.field_mapping)))
    }
}
