/// Key-value store backing ticket phases, verify codes and the OAuth2 token cache
///
/// The store is the source of truth for ticket phase, not merely a cache:
/// when it is unreachable every verification flow fails. There is no local
/// fallback.
mod memory;

pub use memory::MemoryStore;

use crate::{
    config::RedisConfig,
    error::{LinkError, LinkResult},
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Key-value backend
///
/// Keys passed in are logical keys (`category` + id); backends may add their
/// own namespace prefix.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key` for `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LinkResult<()>;

    /// Fetch the value stored under `key`, `None` when absent or expired
    async fn get(&self, key: &str) -> LinkResult<Option<String>>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> LinkResult<()>;
}

/// Key categories, one per kind of entry
pub mod categories {
    pub const TICKET_PHASE: &str = "TicketPhase:";
    pub const VERIFY_CODE: &str = "VerifyCode:";
    pub const OAUTH_TOKEN: &str = "OAuth2Token:";
    pub const IDP_STATE: &str = "IdpState:";
    pub const IDP_PENDING: &str = "IdpPending:";
}

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: &RedisConfig) -> LinkResult<Self> {
        info!("Connecting to Redis at {}:{}/{}", config.host, config.port, config.db);

        let client = Client::open(config.url()).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            LinkError::Cache(format!("Redis client creation failed: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            LinkError::Cache(format!("Redis connection failed: {}", e))
        })?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        })
    }

    /// Build a physical key with prefix
    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Bound a command by the configured timeout
    async fn timed<T, F>(&self, op: &str, key: &str, fut: F) -> LinkResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Redis {} failed for {}: {}", op, key, e);
                Err(LinkError::Cache(format!("Cache {} failed: {}", op, e)))
            }
            Err(_) => {
                warn!("Redis {} timed out for {}", op, key);
                Err(LinkError::Cache(format!("Cache {} timed out", op)))
            }
        }
    }

    /// Ping Redis to check connection
    pub async fn ping(&self) -> LinkResult<()> {
        let mut conn = self.connection.clone();
        let pong: String = self
            .timed("PING", "", redis::cmd("PING").query_async(&mut conn))
            .await?;

        if pong != "PONG" {
            return Err(LinkError::Cache("Unexpected Redis PING response".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LinkResult<()> {
        let cache_key = self.build_key(key);
        // SETEX rejects a zero expiry
        let ttl_secs = ttl.as_secs().max(1);

        debug!("Cache SET: {} (TTL: {}s)", cache_key, ttl_secs);

        let mut conn = self.connection.clone();
        self.timed::<(), _>("SET", &cache_key, conn.set_ex(&cache_key, value, ttl_secs))
            .await
    }

    async fn get(&self, key: &str) -> LinkResult<Option<String>> {
        let cache_key = self.build_key(key);

        let mut conn = self.connection.clone();
        let result: Option<String> = self.timed("GET", &cache_key, conn.get(&cache_key)).await?;

        match &result {
            Some(_) => debug!("Cache HIT: {}", cache_key),
            None => debug!("Cache MISS: {}", cache_key),
        }

        Ok(result)
    }

    async fn delete(&self, key: &str) -> LinkResult<()> {
        let cache_key = self.build_key(key);

        debug!("Cache DELETE: {}", cache_key);

        let mut conn = self.connection.clone();
        self.timed::<(), _>("DELETE", &cache_key, conn.del(&cache_key))
            .await
    }
}
