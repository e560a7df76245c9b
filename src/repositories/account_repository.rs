use crate::error::{AppError, Result};
use crate::models::{Account, AccountSubtype};
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for ledger accounts. Balances are never written here; they are
/// only mutated inside the posting transaction.
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the account if its (tenant, user, subtype, currency) identity
    /// is free, otherwise returns the existing row. Creation races resolve
    /// through the unique index: the loser reads the winner's row.
    pub async fn create_or_get(&self, account: &Account) -> Result<Account> {
        let inserted = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id, user_id, subtype, currency) DO NOTHING
            RETURNING id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            "#,
        )
        .bind(account.id)
        .bind(&account.tenant_id)
        .bind(&account.user_id)
        .bind(account.subtype)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.allow_negative)
        .bind(account.credit_limit)
        .bind(account.status)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        match inserted {
            Some(row) => Ok(row),
            None => self
                .find_by_identity(
                    &account.tenant_id,
                    &account.user_id,
                    account.subtype,
                    &account.currency,
                )
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "account ({}, {}, {:?}, {}) vanished after conflict",
                        account.tenant_id, account.user_id, account.subtype, account.currency
                    ))
                }),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_identity(
        &self,
        tenant_id: &str,
        user_id: &str,
        subtype: AccountSubtype,
        currency: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            FROM accounts
            WHERE tenant_id = $1 AND user_id = $2 AND subtype = $3 AND currency = $4
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(subtype)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// All accounts a user holds with the tenant, across subtypes and
    /// currencies.
    pub async fn find_by_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            FROM accounts
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY currency, subtype
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Suspends the account. Closed accounts reject further posting; rows are
    /// never deleted.
    pub async fn close(&self, id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET status = 'CLOSED', updated_at = NOW()
            WHERE id = $1
            RETURNING id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Explicit admin operation; posting never flips this flag on its own.
    pub async fn set_allow_negative(
        &self,
        id: Uuid,
        allow_negative: bool,
        credit_limit: Option<i64>,
    ) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET allow_negative = $2, credit_limit = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(allow_negative)
        .bind(credit_limit)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
