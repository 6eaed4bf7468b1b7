/// OAuth2 client and token metadata
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Registered third-party client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub id: String,
    pub secret: String,
    /// Redirect URIs must live on this domain
    pub domain: String,
    pub user_id: i64,
}

/// Full metadata of an issued code or token pair
///
/// Serialized once and stored both in the token row and in the cache.
/// Timestamps are unix seconds, lifetimes are seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub client_id: String,
    /// Username of the resource owner
    pub user_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,

    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub code_created_at: i64,
    #[serde(default)]
    pub code_expires_in: u64,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,

    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub access_created_at: i64,
    #[serde(default)]
    pub access_expires_in: u64,

    #[serde(default)]
    pub refresh: String,
    #[serde(default)]
    pub refresh_created_at: i64,
    #[serde(default)]
    pub refresh_expires_in: u64,
}

fn expiry(created_at: i64, expires_in: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(created_at + expires_in as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl TokenInfo {
    pub fn code_expires_at(&self) -> DateTime<Utc> {
        expiry(self.code_created_at, self.code_expires_in)
    }

    pub fn access_expires_at(&self) -> DateTime<Utc> {
        expiry(self.access_created_at, self.access_expires_in)
    }

    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        expiry(self.refresh_created_at, self.refresh_expires_in)
    }

    /// Latest instant at which any credential in this record is usable
    pub fn row_expires_at(&self) -> DateTime<Utc> {
        if !self.code.is_empty() {
            return self.code_expires_at();
        }
        let access = self.access_expires_at();
        if self.refresh.is_empty() {
            access
        } else {
            access.max(self.refresh_expires_at())
        }
    }
}

/// Body of a successful token response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub scope: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_expiry_prefers_code() {
        let info = TokenInfo {
            code: "c".to_string(),
            code_created_at: 1_000,
            code_expires_in: 600,
            ..Default::default()
        };
        assert_eq!(info.row_expires_at().timestamp(), 1_600);
    }

    #[test]
    fn test_row_expiry_covers_refresh() {
        let info = TokenInfo {
            access: "a".to_string(),
            access_created_at: 1_000,
            access_expires_in: 7_200,
            refresh: "r".to_string(),
            refresh_created_at: 1_000,
            refresh_expires_in: 604_800,
            ..Default::default()
        };
        assert_eq!(info.row_expires_at().timestamp(), 605_800);
    }
}
