use crate::error::{AppError, Result};
use crate::events::EventPublisher;
use crate::models::{Account, AccountSubtype, LedgerEntry, LedgerTransaction};
use crate::observability::get_metrics;
use crate::repositories::{
    AccountRepository, EntryRepository, TransactionRepository,
};
use crate::services::posting_engine::{PostOutcome, PostRequest, PostingEngine};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Attempts for a posting hitting transient storage faults. Deterministic
/// business rejections are never retried.
const MAX_POST_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Balance view of a single account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceView {
    pub balance: i64,
    /// Balance minus the owner's Locked-subtype sibling balance in the same
    /// currency.
    pub available_balance: i64,
}

/// Facade over the posting engine: the only authorizer of money movement.
///
/// Every mutation of an account balance in the system flows through here.
/// The wallet projection mirrors these results but never decides anything.
pub struct LedgerService {
    engine: PostingEngine,
    account_repo: AccountRepository,
    transaction_repo: TransactionRepository,
    entry_repo: EntryRepository,
    events: EventPublisher,
}

impl LedgerService {
    pub fn new(pool: PgPool, events: EventPublisher) -> Self {
        Self {
            engine: PostingEngine::new(pool.clone()),
            account_repo: AccountRepository::new(pool.clone()),
            transaction_repo: TransactionRepository::new(pool.clone()),
            entry_repo: EntryRepository::new(pool),
            events,
        }
    }

    /// Posts a transaction, retrying transient storage faults with bounded
    /// backoff. Publishes `ledger.{type}.completed` after commit; replays do
    /// not re-publish.
    pub async fn post(&self, request: PostRequest) -> Result<PostOutcome> {
        let timer = std::time::Instant::now();
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.engine.execute(request.clone()).await {
                Ok(outcome) => break outcome,
                Err(e) if e.is_transient() && attempt < MAX_POST_ATTEMPTS => {
                    warn!(
                        external_ref = %request.external_ref,
                        attempt = attempt,
                        error = %e,
                        "transient posting failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        };

        get_metrics().record_posting(
            outcome.transaction.tx_type.topic_segment(),
            &outcome.transaction.currency,
            outcome.replayed,
        );
        get_metrics().record_posting_latency(timer.elapsed().as_secs_f64() * 1000.0);

        if !outcome.replayed {
            self.events.publish_ledger_completed(&outcome.transaction);
        }
        Ok(outcome)
    }

    /// Reverses a posted transaction. Idempotent: repeated calls replay the
    /// same reversal through its deterministic reference.
    pub async fn reverse(
        &self,
        tx_id: Uuid,
        reason: Option<&str>,
        initiated_by: &str,
    ) -> Result<PostOutcome> {
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.engine.reverse(tx_id, reason, initiated_by).await {
                Ok(outcome) => break outcome,
                Err(e) if e.is_transient() && attempt < MAX_POST_ATTEMPTS => {
                    warn!(tx_id = %tx_id, attempt = attempt, error = %e, "transient reversal failure, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        };

        get_metrics().record_reversal(outcome.transaction.tx_type.topic_segment());
        if !outcome.replayed {
            self.events.publish_ledger_completed(&outcome.transaction);
        }
        Ok(outcome)
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Account> {
        self.account_repo
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account '{}' not found", account_id)))
    }

    /// Authoritative balance of an account. Available balance subtracts the
    /// owner's Locked sibling in the same currency.
    pub async fn get_balance(&self, account_id: Uuid) -> Result<BalanceView> {
        let account = self.get_account(account_id).await?;

        let locked = if account.subtype == AccountSubtype::Locked {
            0
        } else {
            self.account_repo
                .find_by_identity(
                    &account.tenant_id,
                    &account.user_id,
                    AccountSubtype::Locked,
                    &account.currency,
                )
                .await?
                .map(|a| a.balance)
                .unwrap_or(0)
        };

        Ok(BalanceView {
            balance: account.balance,
            available_balance: account.balance - locked,
        })
    }

    pub async fn get_transaction(&self, tx_id: Uuid) -> Result<LedgerTransaction> {
        self.transaction_repo
            .find_by_id(tx_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction '{}' not found", tx_id)))
    }

    pub async fn list_transactions(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        self.transaction_repo
            .list_by_tenant(tenant_id, limit, offset)
            .await
    }

    pub async fn entries_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>> {
        self.entry_repo.find_by_account(account_id, limit, offset).await
    }

    pub async fn entries_for_transaction(&self, tx_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.entry_repo.find_by_transaction(tx_id).await
    }

    /// Reconciliation check: the stored balance must equal the signed entry
    /// sum, and each transaction's entries must balance.
    pub async fn verify_account(&self, account_id: Uuid) -> Result<bool> {
        let account = self.get_account(account_id).await?;
        let entry_sum = self.entry_repo.signed_sum_for_account(account_id).await?;
        Ok(account.balance == entry_sum)
    }

    pub async fn verify_transaction_balance(&self, tx_id: Uuid) -> Result<bool> {
        self.entry_repo.transaction_is_balanced(tx_id).await
    }
}
