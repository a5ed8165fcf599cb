//! PostgreSQL instance store.

use super::InstanceRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use streamvisor_core::{Instance, InstanceStatus};
use tracing::info;

const UNIQUE_VIOLATION: &str = "23505";

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS instance (
    id VARCHAR(50) UNIQUE NOT NULL,
    status VARCHAR(10) NOT NULL CHECK (status IN ('ACTIVE', 'INACTIVE', 'PAUSED')),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CHECK (updated_at >= created_at)
)
"#;

#[derive(Clone)]
pub struct PostgresInstanceRepository {
    pool: PgPool,
}

impl PostgresInstanceRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> ControlPlaneResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> ControlPlaneResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        info!("Instance table ready");
        Ok(())
    }
}

fn instance_from_row(row: &PgRow) -> ControlPlaneResult<Instance> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let status = status.parse::<InstanceStatus>()?;
    Ok(Instance::new(id, status, created_at, updated_at)?)
}

#[async_trait]
impl InstanceRepository for PostgresInstanceRepository {
    async fn get(&self, instance_id: &str) -> ControlPlaneResult<Option<Instance>> {
        let row = sqlx::query(
            "SELECT id, status, created_at, updated_at FROM instance WHERE id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn create(&self, instance: Instance) -> ControlPlaneResult<String> {
        instance.validate()?;
        let result = sqlx::query(
            "INSERT INTO instance (id, status, created_at, updated_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(instance.id())
        .bind(instance.status().as_str())
        .bind(instance.created_at())
        .bind(instance.updated_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(instance.id().to_string()),
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(ControlPlaneError::InstanceAlreadyExists(
                    instance.id().to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, instance: &Instance) -> ControlPlaneResult<u64> {
        instance.validate()?;
        let result = sqlx::query("UPDATE instance SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(instance.id())
            .bind(instance.status().as_str())
            .bind(instance.updated_at())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, instance_id: &str) -> ControlPlaneResult<u64> {
        let result = sqlx::query("DELETE FROM instance WHERE id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
