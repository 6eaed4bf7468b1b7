/// In-process repository backend for tests and local experiments
use crate::{
    db::{
        BindingRepository, IdpBinding, NewOAuthToken, NewUser, OAuthClientRepository,
        OAuthClientRow, OAuthTokenRepository, OAuthTokenRow, Profile, SettingRepository,
        TokenColumn, User, UserRepository,
    },
    error::{LinkError, LinkResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    next_user_id: i64,
    next_token_id: i64,
    users: Vec<User>,
    profiles: Vec<Profile>,
    settings: HashMap<(i64, String), String>,
    clients: HashMap<String, OAuthClientRow>,
    tokens: Vec<OAuthTokenRow>,
    bindings: HashMap<(String, String), IdpBinding>,
}

/// All tables behind one lock, so multi-row writes are atomic
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored token rows, expired or not
    pub async fn token_count(&self) -> usize {
        self.tables.read().await.tokens.len()
    }

    /// Insert a token row with an explicit creation time
    pub async fn insert_token_at(&self, token: NewOAuthToken, created_at: DateTime<Utc>) -> i64 {
        let mut tables = self.tables.write().await;
        tables.next_token_id += 1;
        let id = tables.next_token_id;
        tables.tokens.push(OAuthTokenRow {
            id,
            created_at,
            expired_at: token.expired_at,
            code: token.code,
            access: token.access,
            refresh: token.refresh,
            data: token.data,
        });
        id
    }
}

#[async_trait]
impl UserRepository for MemoryDatabase {
    async fn user_by_id(&self, id: i64) -> LinkResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.id == id && !u.is_deleted)
            .cloned())
    }

    async fn user_by_uid(&self, uid: &str) -> LinkResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.uid == uid && !u.is_deleted)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> LinkResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.email == email && !u.is_deleted)
            .cloned())
    }

    async fn create_user_and_profile(&self, new_user: NewUser) -> LinkResult<User> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .iter()
            .any(|u| u.uid == new_user.uid || u.email == new_user.email)
        {
            return Err(LinkError::UserExists);
        }

        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            uid: new_user.uid,
            email: new_user.email.clone(),
            password_hash: new_user.password_hash,
            created_at: Utc::now(),
            is_deleted: false,
        };
        tables.users.push(user.clone());
        tables.profiles.push(Profile {
            user_id: user.id,
            nickname: new_user.nickname,
            email: new_user.email,
        });
        Ok(user)
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> LinkResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(LinkError::UserNotFound)?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> LinkResult<Option<Profile>> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl SettingRepository for MemoryDatabase {
    async fn user_setting(&self, user_id: i64, key: &str) -> LinkResult<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables.settings.get(&(user_id, key.to_string())).cloned())
    }

    async fn put_user_setting(&self, user_id: i64, key: &str, value: &str) -> LinkResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .settings
            .insert((user_id, key.to_string()), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl OAuthClientRepository for MemoryDatabase {
    async fn insert_client(&self, row: OAuthClientRow) -> LinkResult<()> {
        let mut tables = self.tables.write().await;
        if tables.clients.contains_key(&row.id) {
            return Err(LinkError::InvalidInput(format!(
                "Client {} already exists",
                row.id
            )));
        }
        tables.clients.insert(row.id.clone(), row);
        Ok(())
    }

    async fn client_by_id(&self, id: &str) -> LinkResult<Option<OAuthClientRow>> {
        Ok(self.tables.read().await.clients.get(id).cloned())
    }
}

#[async_trait]
impl OAuthTokenRepository for MemoryDatabase {
    async fn insert_token(&self, token: NewOAuthToken) -> LinkResult<i64> {
        Ok(self.insert_token_at(token, Utc::now()).await)
    }

    async fn token_by(&self, column: TokenColumn, value: &str) -> LinkResult<Option<OAuthTokenRow>> {
        if value.is_empty() {
            return Ok(None);
        }
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .iter()
            .find(|row| column.value_of(row) == value)
            .cloned())
    }

    async fn delete_tokens_by(&self, column: TokenColumn, value: &str) -> LinkResult<u64> {
        if value.is_empty() {
            return Ok(0);
        }
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|row| column.value_of(row) != value);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> LinkResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|row| row.expired_at > now);
        Ok((before - tables.tokens.len()) as u64)
    }
}

#[async_trait]
impl BindingRepository for MemoryDatabase {
    async fn binding(&self, provider: &str, union_id: &str) -> LinkResult<Option<IdpBinding>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bindings
            .get(&(provider.to_string(), union_id.to_string()))
            .cloned())
    }

    async fn upsert_binding(&self, binding: IdpBinding) -> LinkResult<()> {
        let mut tables = self.tables.write().await;
        tables.bindings.insert(
            (binding.provider.clone(), binding.union_id.clone()),
            binding,
        );
        Ok(())
    }
}
