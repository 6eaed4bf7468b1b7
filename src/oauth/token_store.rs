use crate::{
    cache::{categories, KvStore},
    db::{Database, NewOAuthToken, OAuthTokenRepository, TokenColumn},
    error::{LinkError, LinkResult},
    jobs::TokenGc,
    oauth::TokenInfo,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Token rows fronted by a write-through cache
///
/// Every row gets one cache entry per lookup key (code, access, refresh),
/// each living as long as the credential it names.
#[derive(Clone)]
pub struct TokenStore {
    db: Arc<dyn Database>,
    kv: Arc<dyn KvStore>,
}

fn cache_key(value: &str) -> String {
    format!("{}{}", categories::OAUTH_TOKEN, value)
}

fn encode(info: &TokenInfo) -> LinkResult<String> {
    serde_json::to_string(info)
        .map_err(|e| LinkError::Internal(format!("Failed to encode token: {}", e)))
}

fn decode(raw: &str) -> LinkResult<TokenInfo> {
    serde_json::from_str(raw)
        .map_err(|e| LinkError::Internal(format!("Corrupt token record: {}", e)))
}

impl TokenStore {
    pub fn new(db: Arc<dyn Database>, kv: Arc<dyn KvStore>) -> Self {
        Self { db, kv }
    }

    /// Persist `info`
    ///
    /// A code-bearing record is stored under its code only; otherwise the
    /// row carries the access token and, when present, the refresh token.
    pub async fn create(&self, info: &TokenInfo) -> LinkResult<()> {
        let data = encode(info)?;

        if !info.code.is_empty() {
            self.db
                .insert_token(NewOAuthToken {
                    expired_at: info.code_expires_at(),
                    code: info.code.clone(),
                    access: String::new(),
                    refresh: String::new(),
                    data: data.clone(),
                })
                .await?;
            self.kv
                .set(
                    &cache_key(&info.code),
                    &data,
                    Duration::from_secs(info.code_expires_in),
                )
                .await?;
            return Ok(());
        }

        self.db
            .insert_token(NewOAuthToken {
                expired_at: info.row_expires_at(),
                code: String::new(),
                access: info.access.clone(),
                refresh: info.refresh.clone(),
                data: data.clone(),
            })
            .await?;

        self.kv
            .set(
                &cache_key(&info.access),
                &data,
                Duration::from_secs(info.access_expires_in),
            )
            .await?;
        if !info.refresh.is_empty() {
            self.kv
                .set(
                    &cache_key(&info.refresh),
                    &data,
                    Duration::from_secs(info.refresh_expires_in),
                )
                .await?;
        }
        Ok(())
    }

    async fn get_by(&self, column: TokenColumn, value: &str) -> LinkResult<Option<TokenInfo>> {
        if value.is_empty() {
            return Ok(None);
        }
        if let Some(raw) = self.kv.get(&cache_key(value)).await? {
            return decode(&raw).map(Some);
        }
        debug!(column = column.as_str(), "token cache miss");
        match self.db.token_by(column, value).await? {
            Some(row) => decode(&row.data).map(Some),
            None => Ok(None),
        }
    }

    async fn remove_by(&self, column: TokenColumn, value: &str) -> LinkResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.kv.delete(&cache_key(value)).await?;
        self.db.delete_tokens_by(column, value).await?;
        Ok(())
    }

    pub async fn get_by_code(&self, code: &str) -> LinkResult<Option<TokenInfo>> {
        self.get_by(TokenColumn::Code, code).await
    }

    pub async fn get_by_access(&self, access: &str) -> LinkResult<Option<TokenInfo>> {
        self.get_by(TokenColumn::Access, access).await
    }

    pub async fn get_by_refresh(&self, refresh: &str) -> LinkResult<Option<TokenInfo>> {
        self.get_by(TokenColumn::Refresh, refresh).await
    }

    pub async fn remove_by_code(&self, code: &str) -> LinkResult<()> {
        self.remove_by(TokenColumn::Code, code).await
    }

    pub async fn remove_by_access(&self, access: &str) -> LinkResult<()> {
        self.remove_by(TokenColumn::Access, access).await
    }

    pub async fn remove_by_refresh(&self, refresh: &str) -> LinkResult<()> {
        self.remove_by(TokenColumn::Refresh, refresh).await
    }

    /// Delete every row whose expiry has passed
    pub async fn sweep_expired(&self) -> LinkResult<u64> {
        self.db.delete_expired_tokens(Utc::now()).await
    }

    /// Start the background sweeper; `None` when `interval` is zero
    pub fn start_gc(&self, interval: Duration) -> Option<TokenGc> {
        TokenGc::start(self.clone(), interval)
    }
}
