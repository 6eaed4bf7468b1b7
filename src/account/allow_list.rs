/// Per-user allow-list of issued access tokens
///
/// Stored as a single JSON array in the user's settings. A token is only
/// accepted while its exact string is present here, which lets a single
/// token be revoked without rotating the signing secret.
use crate::{
    db::SettingRepository,
    error::{LinkError, LinkResult},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Settings key holding the allow-list
pub const ACCESS_TOKEN_SETTING_KEY: &str = "access_token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenEntry {
    pub access_token: String,
    #[serde(default)]
    pub description: String,
    pub created_ts: i64,
    #[serde(default)]
    pub last_used_ts: i64,
}

impl AccessTokenEntry {
    pub fn new(access_token: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            access_token: access_token.into(),
            description: description.into(),
            created_ts: now,
            last_used_ts: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<AccessTokenEntry>,
}

impl AllowList {
    /// Parse the stored setting; a missing setting is an empty list
    pub fn parse(raw: Option<&str>) -> LinkResult<Self> {
        let entries = match raw {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|e| {
                LinkError::Internal(format!("Corrupt access token allow-list: {}", e))
            })?,
            _ => Vec::new(),
        };
        Ok(Self { entries })
    }

    pub fn to_json(&self) -> LinkResult<String> {
        serde_json::to_string(&self.entries)
            .map_err(|e| LinkError::Internal(format!("Failed to encode allow-list: {}", e)))
    }

    /// Exact string membership
    pub fn contains(&self, access_token: &str) -> bool {
        self.entries.iter().any(|e| e.access_token == access_token)
    }

    pub fn push(&mut self, entry: AccessTokenEntry) {
        self.entries.push(entry);
    }

    /// Remove every entry for `access_token`, returning whether any existed
    pub fn remove(&mut self, access_token: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.access_token != access_token);
        before != self.entries.len()
    }

    /// Keep only entries for which `keep` holds
    pub fn retain(&mut self, mut keep: impl FnMut(&AccessTokenEntry) -> bool) {
        self.entries.retain(|e| keep(e));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub async fn load_allow_list<S>(settings: &S, user_id: i64) -> LinkResult<AllowList>
where
    S: SettingRepository + ?Sized,
{
    let raw = settings
        .user_setting(user_id, ACCESS_TOKEN_SETTING_KEY)
        .await?;
    AllowList::parse(raw.as_deref())
}

pub async fn store_allow_list<S>(settings: &S, user_id: i64, list: &AllowList) -> LinkResult<()>
where
    S: SettingRepository + ?Sized,
{
    settings
        .put_user_setting(user_id, ACCESS_TOKEN_SETTING_KEY, &list.to_json()?)
        .await
}
