/// PostgreSQL backend for the repository traits
use crate::{
    config::DatabaseConfig,
    db::{
        BindingRepository, IdpBinding, NewOAuthToken, NewUser, OAuthClientRepository,
        OAuthClientRow, OAuthTokenRepository, OAuthTokenRow, Profile, SettingRepository,
        TokenColumn, User, UserRepository,
    },
    error::{LinkError, LinkResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

const UNIQUE_VIOLATION: &str = "23505";

const USER_COLUMNS: &str = "id, uid, email, password_hash, created_at, is_deleted";
const TOKEN_COLUMNS: &str = "id, created_at, expired_at, code, access, refresh, data";

/// Create a PostgreSQL connection pool
pub async fn create_pool(config: &DatabaseConfig) -> LinkResult<PgPool> {
    info!(
        host = %config.host,
        database = %config.database,
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .connect(&config.dsn())
        .await
        .map_err(|e| {
            error!("Failed to connect to PostgreSQL: {}", e);
            LinkError::Database(e)
        })?;

    Ok(pool)
}

/// Run embedded migrations
pub async fn run_migrations(pool: &PgPool) -> LinkResult<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        error!("Failed to run migrations: {}", e);
        LinkError::Internal(format!("Migration failed: {}", e))
    })?;

    info!("Migrations completed");
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

/// Repository implementation over a `PgPool`
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, migrate and wrap the pool
    pub async fn connect(config: &DatabaseConfig) -> LinkResult<Self> {
        let pool = create_pool(config).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query
    pub async fn ping(&self) -> LinkResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgDatabase {
    async fn user_by_id(&self, id: i64) -> LinkResult<Option<User>> {
        let query = format!(
            "SELECT {} FROM users WHERE id = $1 AND is_deleted = FALSE",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn user_by_uid(&self, uid: &str) -> LinkResult<Option<User>> {
        let query = format!(
            "SELECT {} FROM users WHERE uid = $1 AND is_deleted = FALSE",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn user_by_email(&self, email: &str) -> LinkResult<Option<User>> {
        let query = format!(
            "SELECT {} FROM users WHERE email = $1 AND is_deleted = FALSE",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_user_and_profile(&self, new_user: NewUser) -> LinkResult<User> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "INSERT INTO users (uid, email, password_hash) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&new_user.uid)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LinkError::UserExists
                } else {
                    LinkError::Database(e)
                }
            })?;

        sqlx::query("INSERT INTO profile (user_id, nickname, email) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&new_user.nickname)
            .bind(&new_user.email)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> LinkResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LinkError::UserNotFound);
        }
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> LinkResult<Option<Profile>> {
        Ok(sqlx::query_as::<_, Profile>(
            "SELECT user_id, nickname, email FROM profile WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl SettingRepository for PgDatabase {
    async fn user_setting(&self, user_id: i64, key: &str) -> LinkResult<Option<String>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_setting WHERE user_id = $1 AND key = $2")
                .bind(user_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|(v,)| v))
    }

    async fn put_user_setting(&self, user_id: i64, key: &str, value: &str) -> LinkResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_setting (user_id, key, value, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OAuthClientRepository for PgDatabase {
    async fn insert_client(&self, row: OAuthClientRow) -> LinkResult<()> {
        sqlx::query(
            "INSERT INTO oauth2_clients (id, secret, domain, user_id, data) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&row.id)
        .bind(&row.secret)
        .bind(&row.domain)
        .bind(row.user_id)
        .bind(&row.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn client_by_id(&self, id: &str) -> LinkResult<Option<OAuthClientRow>> {
        Ok(sqlx::query_as::<_, OAuthClientRow>(
            "SELECT id, secret, domain, user_id, data FROM oauth2_clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl OAuthTokenRepository for PgDatabase {
    async fn insert_token(&self, token: NewOAuthToken) -> LinkResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO oauth2_tokens (expired_at, code, access, refresh, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(token.expired_at)
        .bind(&token.code)
        .bind(&token.access)
        .bind(&token.refresh)
        .bind(&token.data)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn token_by(&self, column: TokenColumn, value: &str) -> LinkResult<Option<OAuthTokenRow>> {
        if value.is_empty() {
            return Ok(None);
        }
        // Column names come from a closed enum, never from input
        let query = format!(
            "SELECT {} FROM oauth2_tokens WHERE {} = $1 LIMIT 1",
            TOKEN_COLUMNS,
            column.as_str()
        );
        Ok(sqlx::query_as::<_, OAuthTokenRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_tokens_by(&self, column: TokenColumn, value: &str) -> LinkResult<u64> {
        if value.is_empty() {
            return Ok(0);
        }
        let query = format!("DELETE FROM oauth2_tokens WHERE {} = $1", column.as_str());
        let result = sqlx::query(&query).bind(value).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> LinkResult<u64> {
        let result = sqlx::query("DELETE FROM oauth2_tokens WHERE expired_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BindingRepository for PgDatabase {
    async fn binding(&self, provider: &str, union_id: &str) -> LinkResult<Option<IdpBinding>> {
        Ok(sqlx::query_as::<_, IdpBinding>(
            "SELECT provider, union_id, user_id, info FROM idp_binding WHERE provider = $1 AND union_id = $2",
        )
        .bind(provider)
        .bind(union_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_binding(&self, binding: IdpBinding) -> LinkResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idp_binding (provider, union_id, user_id, info)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, union_id) DO UPDATE SET user_id = EXCLUDED.user_id, info = EXCLUDED.info
            "#,
        )
        .bind(&binding.provider)
        .bind(&binding.union_id)
        .bind(binding.user_id)
        .bind(&binding.info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
