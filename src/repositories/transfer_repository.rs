use crate::error::{AppError, Result};
use crate::models::{Transfer, TransferStateMachine, TransferStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for transfer aggregates.
pub struct TransferRepository {
    pool: PgPool,
}

impl TransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new transfer. Returns None when the (tenant, external_ref)
    /// slot is already taken; the caller reads the existing row and
    /// classifies the replay.
    pub async fn try_insert(&self, transfer: &Transfer) -> Result<Option<Transfer>> {
        let row = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (tenant_id, external_ref) WHERE status NOT IN ('FAILED', 'CANCELLED') DO NOTHING
            RETURNING id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at
            "#,
        )
        .bind(transfer.id)
        .bind(&transfer.tenant_id)
        .bind(&transfer.from_user_id)
        .bind(&transfer.to_user_id)
        .bind(transfer.amount)
        .bind(&transfer.currency)
        .bind(transfer.fee_amount)
        .bind(&transfer.method)
        .bind(transfer.status)
        .bind(transfer.debit_tx_id)
        .bind(transfer.credit_tx_id)
        .bind(transfer.fee_tx_id)
        .bind(&transfer.external_ref)
        .bind(transfer.saga_id)
        .bind(&transfer.metadata)
        .bind(transfer.created_at)
        .bind(transfer.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Transfer>> {
        let row = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_external_ref(
        &self,
        tenant_id: &str,
        external_ref: &str,
    ) -> Result<Option<Transfer>> {
        let row = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at
            FROM transfers
            WHERE tenant_id = $1 AND external_ref = $2
            "#,
        )
        .bind(tenant_id)
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Records the ledger transaction ids once the legs are posted.
    pub async fn link_transactions(
        &self,
        id: Uuid,
        debit_tx_id: Option<Uuid>,
        credit_tx_id: Option<Uuid>,
        fee_tx_id: Option<Uuid>,
    ) -> Result<Option<Transfer>> {
        let row = sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET debit_tx_id = COALESCE($2, debit_tx_id),
                credit_tx_id = COALESCE($3, credit_tx_id),
                fee_tx_id = COALESCE($4, fee_tx_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(debit_tx_id)
        .bind(credit_tx_id)
        .bind(fee_tx_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Transitions the transfer's status, enforcing the monotonic state
    /// machine both in process and in the WHERE guard. Returns None when the
    /// row is missing or the stored status no longer permits the move, which
    /// callers treat as "someone else already settled this".
    pub async fn transition(
        &self,
        id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<Option<Transfer>> {
        if !TransferStateMachine::can_transition(from, to) {
            return Err(AppError::Validation(format!(
                "invalid transfer transition {:?} -> {:?}",
                from, to
            )));
        }

        let row = sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Cancels a transfer from any non-terminal state. Used by saga
    /// compensation and recovery; a no-op when the transfer already reached
    /// a terminal status.
    pub async fn cancel_if_open(&self, id: Uuid) -> Result<Option<Transfer>> {
        let row = sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET status = 'CANCELLED', updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'ACTIVE')
            RETURNING id, tenant_id, from_user_id, to_user_id, amount, currency, fee_amount, method, status, debit_tx_id, credit_tx_id, fee_tx_id, external_ref, saga_id, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
