use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use crate::errors::AppError;
use crate::models::{PersistedState, STATE_RECORD_NAME};
use crate::storage::StateStorage;

/// Keeps the state record as a JSON payload in the `state_records` table,
/// keyed by record name.
#[derive(Clone)]
pub struct PgStateStorage {
    pool: PgPool,
    name: String,
}

impl PgStateStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, name: STATE_RECORD_NAME.to_string() }
    }

    /// Runs the bundled migrations against `pool`.
    pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
            error!("Failed to run database migrations: {e}");
            AppError::db_query("Failed to run migrations", sqlx::Error::from(e))
        })
    }
}

#[async_trait]
impl StateStorage for PgStateStorage {
    async fn load(&self) -> Result<Option<PersistedState>, AppError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM state_records WHERE name = $1")
                .bind(&self.name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to load state record {}: {e}", self.name);
                    AppError::db_query(format!("Failed to load state record {}", self.name), e)
                })?;

        match payload {
            Some(json) if !json.trim().is_empty() => {
                serde_json::from_str(&json).map(Some).map_err(AppError::StorageSerde)
            }
            _ => Ok(None),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), AppError> {
        let payload = serde_json::to_string(state).map_err(AppError::StorageSerde)?;
        sqlx::query(
            "INSERT INTO state_records (name, payload, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE
             SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
        )
        .bind(&self.name)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save state record {}: {e}", self.name);
            AppError::db_query("Failed to save state record", e)
        })?;
        Ok(())
    }
}
