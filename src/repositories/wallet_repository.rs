use crate::error::{AppError, Result};
use crate::models::Wallet;
use sqlx::PgPool;

/// Repository for the wallet projection. Balance fields are written only by
/// the sync path; lifetime counters only through the additive updates below.
pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the wallet if its key is free, otherwise returns the existing
    /// row; concurrent creators collapse on the unique index.
    pub async fn create_or_get(&self, wallet: &Wallet) -> Result<Wallet> {
        let inserted = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (id, tenant_id, user_id, currency, category, balance, bonus_balance, locked_balance, allow_negative, credit_limit, lifetime_deposits, lifetime_withdrawals, lifetime_fees, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (tenant_id, user_id, currency, category) DO NOTHING
            RETURNING id, tenant_id, user_id, currency, category, balance, bonus_balance, locked_balance, allow_negative, credit_limit, lifetime_deposits, lifetime_withdrawals, lifetime_fees, status, created_at, updated_at
            "#,
        )
        .bind(wallet.id)
        .bind(&wallet.tenant_id)
        .bind(&wallet.user_id)
        .bind(&wallet.currency)
        .bind(&wallet.category)
        .bind(wallet.balance)
        .bind(wallet.bonus_balance)
        .bind(wallet.locked_balance)
        .bind(wallet.allow_negative)
        .bind(wallet.credit_limit)
        .bind(wallet.lifetime_deposits)
        .bind(wallet.lifetime_withdrawals)
        .bind(wallet.lifetime_fees)
        .bind(wallet.status)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        match inserted {
            Some(row) => Ok(row),
            None => self
                .find(&wallet.tenant_id, &wallet.user_id, &wallet.currency, &wallet.category)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "wallet ({}, {}, {}, {}) vanished after conflict",
                        wallet.tenant_id, wallet.user_id, wallet.currency, wallet.category
                    ))
                }),
        }
    }

    pub async fn find(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
    ) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, tenant_id, user_id, currency, category, balance, bonus_balance, locked_balance, allow_negative, credit_limit, lifetime_deposits, lifetime_withdrawals, lifetime_fees, status, created_at, updated_at
            FROM wallets
            WHERE tenant_id = $1 AND user_id = $2 AND currency = $3 AND category = $4
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(currency)
        .bind(category)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// All wallets a user holds with the tenant.
    pub async fn find_by_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, tenant_id, user_id, currency, category, balance, bonus_balance, locked_balance, allow_negative, credit_limit, lifetime_deposits, lifetime_withdrawals, lifetime_fees, status, created_at, updated_at
            FROM wallets
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY currency, category
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Projection write: replaces the mirrored balances atomically.
    pub async fn write_balances(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
        balance: i64,
        bonus_balance: i64,
        locked_balance: i64,
    ) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets
            SET balance = $5, bonus_balance = $6, locked_balance = $7, updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND currency = $3 AND category = $4
            RETURNING id, tenant_id, user_id, currency, category, balance, bonus_balance, locked_balance, allow_negative, credit_limit, lifetime_deposits, lifetime_withdrawals, lifetime_fees, status, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(currency)
        .bind(category)
        .bind(balance)
        .bind(bonus_balance)
        .bind(locked_balance)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Additive update of the advisory lifetime counters. Never consulted
    /// for authorization.
    pub async fn increment_lifetime_counters(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
        deposits: i64,
        withdrawals: i64,
        fees: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wallets
            SET lifetime_deposits = lifetime_deposits + $5,
                lifetime_withdrawals = lifetime_withdrawals + $6,
                lifetime_fees = lifetime_fees + $7,
                updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND currency = $3 AND category = $4
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(currency)
        .bind(category)
        .bind(deposits)
        .bind(withdrawals)
        .bind(fees)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
