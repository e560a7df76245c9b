use crate::error::Result;
use crate::models::{AccountSubtype, Wallet};
use crate::observability::get_metrics;
use crate::repositories::{AccountRepository, WalletRepository};
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

/// A single lookup in a bulk balance read.
#[derive(Debug, Clone)]
pub struct WalletKey {
    pub user_id: String,
    pub currency: String,
    pub category: String,
}

/// The wallet projection service.
///
/// Wallets mirror ledger balances for fast lookup and are eventually
/// consistent with the ledger; any drift reconciles toward the ledger via
/// `sync_from_ledger`. No posting decision ever reads a wallet.
pub struct WalletService {
    wallet_repo: WalletRepository,
    account_repo: AccountRepository,
}

impl WalletService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            wallet_repo: WalletRepository::new(pool.clone()),
            account_repo: AccountRepository::new(pool),
        }
    }

    /// Returns the wallet for the key, creating it when absent. Concurrent
    /// creators collapse on the unique index.
    pub async fn ensure_wallet(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
    ) -> Result<Wallet> {
        if let Some(existing) = self
            .wallet_repo
            .find(tenant_id, user_id, currency, category)
            .await?
        {
            return Ok(existing);
        }
        let wallet = Wallet::new(tenant_id, user_id, currency, category);
        self.wallet_repo.create_or_get(&wallet).await
    }

    /// Projected balance read. May lag the ledger within the staleness
    /// bound; callers that need the authoritative value ask the ledger.
    pub async fn read_balance(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
    ) -> Result<Wallet> {
        self.ensure_wallet(tenant_id, user_id, currency, category).await
    }

    /// All wallets of one user.
    pub async fn user_balances(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Wallet>> {
        self.wallet_repo.find_by_user(tenant_id, user_id).await
    }

    /// Bulk projected reads; missing wallets are created lazily so the
    /// result aligns with the request.
    pub async fn bulk_balances(&self, tenant_id: &str, keys: &[WalletKey]) -> Result<Vec<Wallet>> {
        let mut wallets = Vec::with_capacity(keys.len());
        for key in keys {
            wallets.push(
                self.ensure_wallet(tenant_id, &key.user_id, &key.currency, &key.category)
                    .await?,
            );
        }
        Ok(wallets)
    }

    /// Recomputes the wallet's mirrored balances from the user's Main, Bonus
    /// and Locked accounts and writes them atomically. Syncing twice in a
    /// row is a no-op the second time.
    pub async fn sync_from_ledger(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
    ) -> Result<Wallet> {
        let timer = std::time::Instant::now();
        self.ensure_wallet(tenant_id, user_id, currency, category).await?;

        let balance = self
            .subtype_balance(tenant_id, user_id, AccountSubtype::Main, currency)
            .await?;
        let bonus_balance = self
            .subtype_balance(tenant_id, user_id, AccountSubtype::Bonus, currency)
            .await?;
        let locked_balance = self
            .subtype_balance(tenant_id, user_id, AccountSubtype::Locked, currency)
            .await?;

        let wallet = self
            .wallet_repo
            .write_balances(
                tenant_id,
                user_id,
                currency,
                category,
                balance,
                bonus_balance,
                locked_balance,
            )
            .await?
            .ok_or_else(|| {
                crate::error::AppError::Internal(anyhow::anyhow!(
                    "wallet ({}, {}, {}, {}) vanished during sync",
                    tenant_id,
                    user_id,
                    currency,
                    category
                ))
            })?;

        get_metrics().record_wallet_sync_latency(timer.elapsed().as_secs_f64() * 1000.0);
        debug!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            currency = %currency,
            balance = balance,
            "wallet synced from ledger"
        );
        Ok(wallet)
    }

    /// Syncs the default-category wallets of every (tenant, user, currency)
    /// owning one of the given accounts. Driven by the event projector and
    /// by the operations layer after posts.
    pub async fn sync_for_accounts(&self, account_ids: &[Uuid]) -> Result<()> {
        let mut seen: BTreeSet<(String, String, String)> = BTreeSet::new();
        for account_id in account_ids {
            let Some(account) = self.account_repo.find_by_id(*account_id).await? else {
                continue;
            };
            let key = (
                account.tenant_id.clone(),
                account.user_id.clone(),
                account.currency.clone(),
            );
            if seen.insert(key) {
                self.sync_from_ledger(
                    &account.tenant_id,
                    &account.user_id,
                    &account.currency,
                    Wallet::DEFAULT_CATEGORY,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Advisory lifetime counters; additive updates only, never used for
    /// authorization.
    pub async fn record_lifetime(
        &self,
        tenant_id: &str,
        user_id: &str,
        currency: &str,
        category: &str,
        deposits: i64,
        withdrawals: i64,
        fees: i64,
    ) -> Result<()> {
        self.wallet_repo
            .increment_lifetime_counters(
                tenant_id, user_id, currency, category, deposits, withdrawals, fees,
            )
            .await
    }

    async fn subtype_balance(
        &self,
        tenant_id: &str,
        user_id: &str,
        subtype: AccountSubtype,
        currency: &str,
    ) -> Result<i64> {
        Ok(self
            .account_repo
            .find_by_identity(tenant_id, user_id, subtype, currency)
            .await?
            .map(|a| a.balance)
            .unwrap_or(0))
    }
}
