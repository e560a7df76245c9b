use crate::error::{AppError, Result};
use sqlx::{PgConnection, PgPool};

/// Per-tenant monotonic sequence allocator. Values are strictly increasing
/// per tenant; gaps are permitted (a rolled-back posting burns its value).
pub struct SequenceRepository {
    pool: PgPool,
}

impl SequenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocates the next sequence value inside the caller's transaction so
    /// the counter row stays locked until the posting commits.
    pub async fn next_in_tx(conn: &mut PgConnection, tenant_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO tenant_sequences (tenant_id, value)
            VALUES ($1, 1)
            ON CONFLICT (tenant_id) DO UPDATE SET value = tenant_sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(tenant_id)
        .fetch_one(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row.0)
    }

    /// Current high-water mark for a tenant; 0 when nothing was allocated.
    pub async fn current(&self, tenant_id: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT value FROM tenant_sequences WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(|r| r.0).unwrap_or(0))
    }
}
