/// Application context and dependency injection
use crate::{
    account::AccountService,
    cache::{KvStore, RedisStore},
    config::ServerConfig,
    credential::CredentialCodec,
    db::{Database, PgDatabase},
    error::LinkResult,
    idp::{self, IdentityProvider},
    mailer::{EmailSender, Mailer},
    oauth::{AuthorizationServer, ClientStore, TokenStore},
    rate_limit::RateLimiter,
    verification::PhaseStore,
};
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub codec: Arc<CredentialCodec>,
    pub db: Arc<dyn Database>,
    pub kv: Arc<dyn KvStore>,
    pub accounts: AccountService,
    pub oauth: AuthorizationServer,
    pub rate_limiter: Arc<RateLimiter>,
    pub http: reqwest::Client,
}

impl AppContext {
    /// Connect PostgreSQL and Redis and wire every service
    pub async fn new(config: ServerConfig) -> LinkResult<Self> {
        config.validate()?;

        let db = PgDatabase::connect(&config.database).await?;
        db.ping().await?;
        info!("PostgreSQL ready");

        let kv = RedisStore::connect(&config.redis).await?;
        kv.ping().await?;
        info!("Redis ready");

        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("Email not configured, verify codes will only be logged at debug level");
        }

        Self::from_parts(config, Arc::new(db), Arc::new(kv), Arc::new(mailer))
    }

    /// Wire services over already-built backends
    pub fn from_parts(
        config: ServerConfig,
        db: Arc<dyn Database>,
        kv: Arc<dyn KvStore>,
        mailer: Arc<dyn EmailSender>,
    ) -> LinkResult<Self> {
        let config = Arc::new(config);
        let codec = Arc::new(CredentialCodec::new(&config.authentication.jwt_secret));

        let accounts = AccountService::new(
            config.clone(),
            codec.clone(),
            PhaseStore::new(kv.clone()),
            db.clone(),
            mailer,
        );
        let oauth = AuthorizationServer::new(
            config.oauth.clone(),
            ClientStore::new(db.clone()),
            TokenStore::new(db.clone(), kv.clone()),
        );
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Ok(Self {
            http: idp::http_client()?,
            config,
            codec,
            db,
            kv,
            accounts,
            oauth,
            rate_limiter,
        })
    }

    /// Configured identity provider by (case-insensitive) name
    pub fn identity_provider(&self, name: &str) -> Option<&IdentityProvider> {
        let name = name.to_lowercase();
        self.config
            .identity_providers
            .iter()
            .find(|provider| provider.name == name)
    }

    /// Public base URL including the API prefix
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.config.service.public_url.trim_end_matches('/'),
            self.config.service.api_prefix,
            path
        )
    }
}
