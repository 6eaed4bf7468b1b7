/// Relational persistence for SAST Link
///
/// The core only talks to the repository traits below. `PgDatabase` backs
/// them with PostgreSQL in production; `MemoryDatabase` backs them in tests.
pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryDatabase;
pub use models::{
    IdpBinding, NewOAuthToken, NewUser, OAuthClientRow, OAuthTokenRow, Profile, TokenColumn, User,
};
pub use postgres::PgDatabase;

use crate::error::LinkResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Account and profile records
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn user_by_id(&self, id: i64) -> LinkResult<Option<User>>;

    async fn user_by_uid(&self, uid: &str) -> LinkResult<Option<User>>;

    async fn user_by_email(&self, email: &str) -> LinkResult<Option<User>>;

    /// Insert the user and its profile atomically
    ///
    /// Fails with `UserExists` when the uid or email is taken.
    async fn create_user_and_profile(&self, new_user: NewUser) -> LinkResult<User>;

    async fn update_password(&self, user_id: i64, password_hash: &str) -> LinkResult<()>;

    async fn profile(&self, user_id: i64) -> LinkResult<Option<Profile>>;
}

/// Per-user keyed JSON settings
#[async_trait]
pub trait SettingRepository: Send + Sync {
    async fn user_setting(&self, user_id: i64, key: &str) -> LinkResult<Option<String>>;

    async fn put_user_setting(&self, user_id: i64, key: &str, value: &str) -> LinkResult<()>;
}

/// Registered OAuth2 clients
#[async_trait]
pub trait OAuthClientRepository: Send + Sync {
    async fn insert_client(&self, row: OAuthClientRow) -> LinkResult<()>;

    async fn client_by_id(&self, id: &str) -> LinkResult<Option<OAuthClientRow>>;
}

/// Issued OAuth2 codes and tokens
#[async_trait]
pub trait OAuthTokenRepository: Send + Sync {
    async fn insert_token(&self, token: NewOAuthToken) -> LinkResult<i64>;

    /// First row whose `column` equals a non-empty `value`
    async fn token_by(&self, column: TokenColumn, value: &str) -> LinkResult<Option<OAuthTokenRow>>;

    /// Delete all rows whose `column` equals a non-empty `value`
    async fn delete_tokens_by(&self, column: TokenColumn, value: &str) -> LinkResult<u64>;

    /// Delete rows expired at or before `now`
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> LinkResult<u64>;
}

/// External identity provider bindings
#[async_trait]
pub trait BindingRepository: Send + Sync {
    async fn binding(&self, provider: &str, union_id: &str) -> LinkResult<Option<IdpBinding>>;

    async fn upsert_binding(&self, binding: IdpBinding) -> LinkResult<()>;
}

/// Everything the service needs from the relational store
pub trait Database:
    UserRepository + SettingRepository + OAuthClientRepository + OAuthTokenRepository + BindingRepository
{
}

impl<T> Database for T where
    T: UserRepository
        + SettingRepository
        + OAuthClientRepository
        + OAuthTokenRepository
        + BindingRepository
{
}
