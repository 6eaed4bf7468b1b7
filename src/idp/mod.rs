/// External identity providers
///
/// Turns an authorization code from an external provider into normalized
/// user info. The wire mechanics are picked by provider name: Lark/Feishu
/// needs an app-token hop that plain OAuth2 providers don't.
mod lark;
mod oauth2;

pub use lark::LarkExchange;
pub use oauth2::GenericOAuth2Exchange;

use crate::error::{LinkError, LinkResult};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Which raw user-info fields feed the normalized shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default = "default_identifier_field")]
    pub identifier: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

fn default_identifier_field() -> String {
    "id".to_string()
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            identifier: default_identifier_field(),
            display_name: "name".to_string(),
            email: "email".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Setting {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub field_mapping: FieldMapping,
    /// App-level token endpoint, only used by Lark
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_token_url: Option<String>,
}

/// Provider settings, one variant per provider type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdpConfig {
    OAuth2(OAuth2Setting),
}

impl IdpConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            IdpConfig::OAuth2(_) => "OAUTH2",
        }
    }

    /// Decode a `config` payload according to its `type` tag
    pub fn decode(kind: &str, config: Value) -> Result<Self, String> {
        match kind.to_ascii_uppercase().as_str() {
            "OAUTH2" => serde_json::from_value(config)
                .map(IdpConfig::OAuth2)
                .map_err(|e| format!("invalid OAUTH2 config: {}", e)),
            other => Err(format!("unknown identity provider type: {}", other)),
        }
    }

    fn encode(&self) -> Value {
        match self {
            IdpConfig::OAuth2(setting) => serde_json::to_value(setting).unwrap_or(Value::Null),
        }
    }

    pub fn oauth2(&self) -> &OAuth2Setting {
        match self {
            IdpConfig::OAuth2(setting) => setting,
        }
    }
}

/// Wire form `{name, title, type, config}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawIdentityProvider {
    name: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "type")]
    kind: String,
    config: Value,
}

/// A configured external provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdentityProvider", into = "RawIdentityProvider")]
pub struct IdentityProvider {
    pub name: String,
    pub title: String,
    pub config: IdpConfig,
}

impl TryFrom<RawIdentityProvider> for IdentityProvider {
    type Error = String;

    fn try_from(raw: RawIdentityProvider) -> Result<Self, Self::Error> {
        if raw.name.trim().is_empty() {
            return Err("identity provider name is required".to_string());
        }
        Ok(Self {
            name: raw.name.to_lowercase(),
            title: raw.title,
            config: IdpConfig::decode(&raw.kind, raw.config)?,
        })
    }
}

impl From<IdentityProvider> for RawIdentityProvider {
    fn from(provider: IdentityProvider) -> Self {
        Self {
            kind: provider.config.kind().to_string(),
            config: provider.config.encode(),
            name: provider.name,
            title: provider.title,
        }
    }
}

/// Normalized external identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpUserInfo {
    pub identifier: String,
    pub display_name: String,
    pub email: Option<String>,
    pub raw: Value,
}

/// Render a scalar JSON field as a string; objects, arrays and null are absent
pub(crate) fn field_as_string(object: &Value, field: &str) -> Option<String> {
    if field.is_empty() {
        return None;
    }
    match object.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Map raw fields through `mapping`; `None` when the identifier is missing
pub(crate) fn normalize_user_info(raw: Value, mapping: &FieldMapping) -> Option<IdpUserInfo> {
    let identifier = field_as_string(&raw, &mapping.identifier)?;
    Some(IdpUserInfo {
        display_name: field_as_string(&raw, &mapping.display_name).unwrap_or_default(),
        email: field_as_string(&raw, &mapping.email),
        identifier,
        raw,
    })
}

pub(crate) fn upstream(provider: &str, err: reqwest::Error) -> LinkError {
    tracing::warn!(provider = %provider, "identity provider request failed: {}", err);
    LinkError::Upstream(format!("{} request failed", provider))
}

/// Code-for-identity exchange against one provider
#[async_trait]
pub trait IdpExchange: Send + Sync {
    /// Where to send the browser to start a login
    fn authorize_url(&self, setting: &OAuth2Setting, redirect_url: &str, state: &str) -> LinkResult<String> {
        let mut url = Url::parse(&setting.auth_url)
            .map_err(|e| LinkError::Internal(format!("Invalid auth_url: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &setting.client_id)
                .append_pair("redirect_uri", redirect_url)
                .append_pair("response_type", "code")
                .append_pair("state", state);
            if !setting.scopes.is_empty() {
                query.append_pair("scope", &setting.scopes.join(" "));
            }
        }
        Ok(url.to_string())
    }

    /// Trade an authorization code for a user access token
    async fn exchange_token(
        &self,
        setting: &OAuth2Setting,
        redirect_url: &str,
        code: &str,
    ) -> LinkResult<String>;

    /// Fetch normalized user info; `None` means the provider gave no identity
    async fn user_info(&self, setting: &OAuth2Setting, token: &str) -> LinkResult<Option<IdpUserInfo>>;
}

/// Shared HTTP client for provider calls
pub fn http_client() -> LinkResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("sast-link/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| LinkError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Pick the exchange implementation for a provider name
pub fn exchange_for(name: &str, http: reqwest::Client) -> Arc<dyn IdpExchange> {
    match name.to_ascii_lowercase().as_str() {
        "lark" | "feishu" => Arc::new(LarkExchange::new(http)),
        _ => Arc::new(GenericOAuth2Exchange::new(http)),
    }
}
