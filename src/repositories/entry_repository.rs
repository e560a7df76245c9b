use crate::error::{AppError, Result};
use crate::models::LedgerEntry;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for append-only ledger entries.
pub struct EntryRepository {
    pool: PgPool,
}

impl EntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_transaction(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, transaction_id, account_id, direction, amount, currency, balance_after, sequence, created_at
            FROM ledger_entries
            WHERE transaction_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Entries for an account in serial order.
    pub async fn find_by_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, transaction_id, account_id, direction, amount, currency, balance_after, sequence, created_at
            FROM ledger_entries
            WHERE account_id = $1
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

    /// Signed sum of all entries for an account: credits minus debits. The
    /// account's stored balance must equal this at all times; reconciliation
    /// compares the two.
    pub async fn signed_sum_for_account(&self, account_id: Uuid) -> Result<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT SUM(CASE WHEN direction = 'CREDIT' THEN amount ELSE -amount END)::BIGINT
            FROM ledger_entries
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.0.unwrap_or(0))
    }

    /// Checks that a transaction's debit and credit amounts balance.
    pub async fn transaction_is_balanced(&self, transaction_id: Uuid) -> Result<bool> {
        let row: (Option<i64>, i64) = sqlx::query_as(
            r#"
            SELECT SUM(CASE WHEN direction = 'DEBIT' THEN amount ELSE -amount END)::BIGINT, COUNT(*)
            FROM ledger_entries
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.1 == 2 && row.0.unwrap_or(0) == 0)
    }
}
