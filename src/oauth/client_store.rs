use crate::{
    db::{Database, OAuthClientRepository, OAuthClientRow},
    error::{LinkError, LinkResult},
    oauth::OAuthClient,
};
use std::sync::Arc;

/// Persists registered clients as serialized rows
#[derive(Clone)]
pub struct ClientStore {
    db: Arc<dyn Database>,
}

impl ClientStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn create(&self, client: &OAuthClient) -> LinkResult<()> {
        let data = serde_json::to_string(client)
            .map_err(|e| LinkError::Internal(format!("Failed to encode client: {}", e)))?;
        self.db
            .insert_client(OAuthClientRow {
                id: client.id.clone(),
                secret: client.secret.clone(),
                domain: client.domain.clone(),
                user_id: client.user_id,
                data,
            })
            .await
    }

    pub async fn get_by_id(&self, id: &str) -> LinkResult<Option<OAuthClient>> {
        if id.is_empty() {
            return Ok(None);
        }
        match self.db.client_by_id(id).await? {
            Some(row) => serde_json::from_str(&row.data)
                .map(Some)
                .map_err(|e| LinkError::Internal(format!("Corrupt client row {}: {}", id, e))),
            None => Ok(None),
        }
    }
}
