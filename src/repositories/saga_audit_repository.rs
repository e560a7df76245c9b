use crate::error::{AppError, Result};
use crate::models::SagaOutcome;
use sqlx::PgPool;
use uuid::Uuid;

/// Durable audit of terminal saga outcomes. The heartbeat store's copy of a
/// terminal saga expires; this table keeps the history.
pub struct SagaAuditRepository {
    pool: PgPool,
}

impl SagaAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a terminal outcome. Recovery and the coordinator may both
    /// attempt the write for the same saga; last writer wins on the status.
    pub async fn record(&self, outcome: &SagaOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_outcomes (saga_id, op_type, status, error, steps, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (saga_id) DO UPDATE
            SET status = EXCLUDED.status, error = EXCLUDED.error, steps = EXCLUDED.steps, finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(outcome.saga_id)
        .bind(&outcome.op_type)
        .bind(&outcome.status)
        .bind(&outcome.error)
        .bind(&outcome.steps)
        .bind(outcome.started_at)
        .bind(outcome.finished_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn find(&self, saga_id: Uuid) -> Result<Option<SagaOutcome>> {
        let row = sqlx::query_as::<_, SagaOutcome>(
            r#"
            SELECT saga_id, op_type, status, error, steps, started_at, finished_at
            FROM saga_outcomes
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
