use crate::error::{AppError, Result};
use crate::models::{Account, AccountPolicy, AccountSubtype};
use crate::repositories::AccountRepository;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

/// Account lifecycle service. Accounts are created lazily on first reference
/// and never deleted; closing an account only suspends posting.
pub struct AccountService {
    account_repo: AccountRepository,
}

impl AccountService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            account_repo: AccountRepository::new(pool),
        }
    }

    /// Returns the account for (tenant, user, subtype, currency), creating
    /// it with the given policy when absent. Idempotent; concurrent callers
    /// collapse on the unique index and the loser reads the winner's row.
    /// The policy only applies on creation, an existing account keeps the
    /// policy it was created with.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
        user_id: &str,
        subtype: AccountSubtype,
        currency: &str,
        policy: AccountPolicy,
    ) -> Result<Account> {
        if let Some(existing) = self
            .account_repo
            .find_by_identity(tenant_id, user_id, subtype, currency)
            .await?
        {
            return Ok(existing);
        }

        let account = Account::new(tenant_id, user_id, subtype, currency, policy);
        let created = self.account_repo.create_or_get(&account).await?;
        if created.id == account.id {
            info!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                subtype = ?subtype,
                currency = %currency,
                account_id = %created.id,
                "created ledger account"
            );
        }
        Ok(created)
    }

    pub async fn get(&self, id: Uuid) -> Result<Account> {
        self.account_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account '{}' not found", id)))
    }

    pub async fn find_by_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Account>> {
        self.account_repo.find_by_user(tenant_id, user_id).await
    }

    /// Suspends the account; further posting is rejected.
    pub async fn close(&self, id: Uuid) -> Result<Account> {
        self.account_repo
            .close(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account '{}' not found", id)))
    }

    /// Admin-only: flips the overdraft policy. The posting path never
    /// changes this flag.
    pub async fn set_allow_negative(
        &self,
        id: Uuid,
        allow_negative: bool,
        credit_limit: Option<i64>,
    ) -> Result<Account> {
        let account = self
            .account_repo
            .set_allow_negative(id, allow_negative, credit_limit)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account '{}' not found", id)))?;

        info!(
            account_id = %id,
            allow_negative = allow_negative,
            credit_limit = ?credit_limit,
            "account overdraft policy changed"
        );
        Ok(account)
    }
}
