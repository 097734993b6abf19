//! Postgres-backed permission store.
//!
//! # Data model
//! One row per granted `(api_key, module, action)` triple in the `permissions`
//! table; the triple is the primary key, so duplicate grants collapse onto the
//! existing row via `ON CONFLICT DO NOTHING`. Module and action are lower-cased
//! by the statements themselves (`LOWER($n)`), so rows written by other tools
//! through the same statements stay comparable.
//!
//! # Operational notes
//! - Migrations run at connect time via `sqlx::migrate!("./migrations")`; a
//!   failed migration fails startup.
//! - Pool acquire and connect timeouts are explicit so a stalled database fails
//!   requests instead of hanging them.
//! - Database URLs may contain credentials; avoid logging them.
use super::{PermissionStore, StoreError, StoreResult};
use crate::config::PostgresConfig;
use async_trait::async_trait;
use keyward_authz::PermissionSet;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Durable permission store backed by Postgres.
///
/// ```rust,no_run
/// use permissions::config::PostgresConfig;
/// use permissions::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect, then apply embedded migrations before returning.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let store = Self::connect_without_migrations(pg).await?;
        sqlx::migrate!("./migrations").run(&store.pool).await?;
        tracing::info!("postgres permission store ready");
        Ok(store)
    }

    /// Connect against an existing schema.
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let connect = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connect)
            .await
            .map_err(|_| StoreError::Database(sqlx::Error::PoolTimedOut))??;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PermissionStore for PostgresStore {
    async fn grant(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO permissions (api_key, module, action)
               VALUES ($1, LOWER($2), LOWER($3))
               ON CONFLICT (api_key, module, action) DO NOTHING"#,
        )
        .bind(api_key)
        .bind(module)
        .bind(action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()> {
        sqlx::query(
            r#"DELETE FROM permissions
               WHERE api_key = $1 AND module = LOWER($2) AND action = LOWER($3)"#,
        )
        .bind(api_key)
        .bind(module)
        .bind(action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, api_key: &str) -> StoreResult<PermissionSet> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"SELECT module, action FROM permissions
               WHERE api_key = $1
               ORDER BY module, action"#,
        )
        .bind(api_key)
        .fetch_all(&self.pool)
        .await?;
        let mut set = PermissionSet::new();
        for (module, action) in rows {
            set.insert(&module, &action);
        }
        Ok(set)
    }

    async fn check(&self, api_key: &str, module: &str, action: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (
                   SELECT 1 FROM permissions
                   WHERE api_key = $1 AND module = LOWER($2) AND action = LOWER($3)
               )"#,
        )
        .bind(api_key)
        .bind(module)
        .bind(action)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
