//! User quota repository: cumulative usage in the user_quotas table.

use anyhow::Context;
use async_trait::async_trait;
use sift_core::{QuotaStore, UserId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Connect to PostgreSQL and apply pending migrations.
pub async fn setup_database(database_url: &str) -> anyhow::Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Row type for user_quotas table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct UserQuotaRow {
    bytes_used: i64,
}

/// Repository for user_quotas table.
#[derive(Clone)]
pub struct PgQuotaRepository {
    pool: PgPool,
}

impl PgQuotaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaRepository {
    #[tracing::instrument(skip(self), fields(db.table = "user_quotas"))]
    async fn get_user_quota(&self, user_id: UserId) -> anyhow::Result<u64> {
        let row: Option<UserQuotaRow> = sqlx::query_as::<Postgres, UserQuotaRow>(
            r#"
            SELECT bytes_used
            FROM user_quotas
            WHERE user_id = $1
            "#,
        )
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| u64::try_from(r.bytes_used).unwrap_or(0))
            .unwrap_or(0))
    }

    #[tracing::instrument(skip(self), fields(db.table = "user_quotas"))]
    async fn increment_user_quota(&self, user_id: UserId, bytes: u64) -> anyhow::Result<()> {
        let bytes = i64::try_from(bytes).context("quota increment exceeds BIGINT")?;

        sqlx::query(
            r#"
            INSERT INTO user_quotas (user_id, bytes_used, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET bytes_used = user_quotas.bytes_used + EXCLUDED.bytes_used,
                updated_at = NOW()
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(bytes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
