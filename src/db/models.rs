/// Relational records read and written by the core
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Account id, the local part of the campus mailbox
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// Input for the atomic user + profile creation
#[derive(Debug, Clone)]
pub struct NewUser {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub nickname: String,
}

/// Profile row created alongside every account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,
    pub nickname: String,
    pub email: String,
}

/// OAuth2 client row; `data` is the serialized client
#[derive(Debug, Clone, FromRow)]
pub struct OAuthClientRow {
    pub id: String,
    pub secret: String,
    pub domain: String,
    pub user_id: i64,
    pub data: String,
}

/// OAuth2 token row; blank `code`/`access`/`refresh` mean "not set"
#[derive(Debug, Clone, FromRow)]
pub struct OAuthTokenRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub code: String,
    pub access: String,
    pub refresh: String,
    pub data: String,
}

/// Token row before insertion
#[derive(Debug, Clone)]
pub struct NewOAuthToken {
    pub expired_at: DateTime<Utc>,
    pub code: String,
    pub access: String,
    pub refresh: String,
    pub data: String,
}

/// Lookup column of the token table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenColumn {
    Code,
    Access,
    Refresh,
}

impl TokenColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenColumn::Code => "code",
            TokenColumn::Access => "access",
            TokenColumn::Refresh => "refresh",
        }
    }

    /// Value of this column in `row`
    pub fn value_of<'a>(&self, row: &'a OAuthTokenRow) -> &'a str {
        match self {
            TokenColumn::Code => &row.code,
            TokenColumn::Access => &row.access,
            TokenColumn::Refresh => &row.refresh,
        }
    }
}

/// External identity bound to a local account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdpBinding {
    pub provider: String,
    pub union_id: String,
    pub user_id: i64,
    /// Raw provider fields as JSON
    pub info: String,
}
