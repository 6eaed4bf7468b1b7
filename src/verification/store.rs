use crate::{
    cache::{categories, KvStore},
    error::LinkResult,
    verification::Phase,
};
use std::sync::Arc;
use std::time::Duration;

/// Typed view over the key-value store for ticket phases and verify codes
///
/// The phase key is the ticket string itself, so a phase record is bound to
/// exactly one signed ticket.
#[derive(Clone)]
pub struct PhaseStore {
    kv: Arc<dyn KvStore>,
}

impl PhaseStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn phase_key(ticket: &str) -> String {
        format!("{}{}", categories::TICKET_PHASE, ticket)
    }

    fn code_key(identity: &str) -> String {
        format!("{}{}", categories::VERIFY_CODE, identity)
    }

    pub async fn set_phase(&self, ticket: &str, phase: Phase, ttl: Duration) -> LinkResult<()> {
        self.kv.set(&Self::phase_key(ticket), phase.as_str(), ttl).await
    }

    /// Current phase of `ticket`, `None` when no record exists
    ///
    /// An unreadable value is treated as a phase error.
    pub async fn phase(&self, ticket: &str) -> LinkResult<Option<Phase>> {
        match self.kv.get(&Self::phase_key(ticket)).await? {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    pub async fn delete_phase(&self, ticket: &str) -> LinkResult<()> {
        self.kv.delete(&Self::phase_key(ticket)).await
    }

    pub async fn set_code(&self, identity: &str, code: &str, ttl: Duration) -> LinkResult<()> {
        self.kv.set(&Self::code_key(identity), code, ttl).await
    }

    pub async fn code(&self, identity: &str) -> LinkResult<Option<String>> {
        self.kv.get(&Self::code_key(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    #[tokio::test]
    async fn test_phase_round_trip() {
        let kv = MemoryStore::new();
        let store = PhaseStore::new(Arc::new(kv.clone()));

        assert_eq!(store.phase("ticket").await.unwrap(), None);

        store
            .set_phase("ticket", Phase::SendEmail, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.phase("ticket").await.unwrap(), Some(Phase::SendEmail));
        assert_eq!(
            kv.get("TicketPhase:ticket").await.unwrap(),
            Some("SEND_EMAIL".to_string())
        );

        store.delete_phase("ticket").await.unwrap();
        assert_eq!(store.phase("ticket").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_phase_is_error() {
        let kv = MemoryStore::new();
        kv.set("TicketPhase:t", "garbage", Duration::from_secs(60))
            .await
            .unwrap();
        let store = PhaseStore::new(Arc::new(kv));
        assert!(store.phase("t").await.is_err());
    }

    #[tokio::test]
    async fn test_code_keyed_by_identity() {
        let kv = MemoryStore::new();
        let store = PhaseStore::new(Arc::new(kv.clone()));
        store
            .set_code("p20030101", "S-abcde", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(kv.contains("VerifyCode:p20030101").await);
        assert_eq!(
            store.code("p20030101").await.unwrap(),
            Some("S-abcde".to_string())
        );
    }
}
