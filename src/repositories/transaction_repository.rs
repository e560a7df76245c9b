use crate::error::{AppError, Result};
use crate::models::{ChargeRole, LedgerTransaction, TransactionStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for posted ledger transactions. Rows are immutable except for
/// the Posted -> Reversed status flip recorded when a reversal lands.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            FROM ledger_transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Looks up the transaction bound to an idempotency key.
    pub async fn find_by_external_ref(
        &self,
        tenant_id: &str,
        external_ref: &str,
        charge_role: ChargeRole,
    ) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            FROM ledger_transactions
            WHERE tenant_id = $1 AND external_ref = $2 AND charge_role = $3
            "#,
        )
        .bind(tenant_id)
        .bind(external_ref)
        .bind(charge_role)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// The reversal transaction pointing at `parent_tx_id`, if one exists.
    pub async fn find_reversal_of(&self, parent_tx_id: Uuid) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            FROM ledger_transactions
            WHERE parent_tx_id = $1
            "#,
        )
        .bind(parent_tx_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list_by_tenant(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            FROM ledger_transactions
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Transactions touching an account, in canonical sequence order. Used
    /// by reconciliation and projection replay.
    pub async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            FROM ledger_transactions
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY sequence
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Flags the original transaction after its reversal has been posted.
    pub async fn mark_reversed(&self, id: Uuid) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            UPDATE ledger_transactions
            SET status = $2
            WHERE id = $1 AND status = $3
            RETURNING id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            "#,
        )
        .bind(id)
        .bind(TransactionStatus::Reversed)
        .bind(TransactionStatus::Posted)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
