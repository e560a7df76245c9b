use crate::error::{AppError, Result};
use crate::models::{
    Account, ChargeRole, CurrencyCode, LedgerEntry, LedgerTransaction, LedgerTransactionType,
    TransactionStatus,
};
use crate::repositories::{EntryRepository, SequenceRepository, TransactionRepository};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

/// Request to post one double-entry transaction.
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub tenant_id: String,
    pub tx_type: LedgerTransactionType,
    pub charge_role: ChargeRole,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    /// Minor units, strictly positive.
    pub amount: i64,
    pub currency: String,
    pub external_ref: String,
    pub initiated_by: String,
    pub parent_tx_id: Option<Uuid>,
    pub exchange_rate: Option<Decimal>,
    pub metadata: Option<serde_json::Value>,
}

impl PostRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: impl Into<String>,
        tx_type: LedgerTransactionType,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: i64,
        currency: impl Into<String>,
        external_ref: impl Into<String>,
        initiated_by: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tx_type,
            charge_role: ChargeRole::Principal,
            from_account_id,
            to_account_id,
            amount,
            currency: currency.into(),
            external_ref: external_ref.into(),
            initiated_by: initiated_by.into(),
            parent_tx_id: None,
            exchange_rate: None,
            metadata: None,
        }
    }

    pub fn with_charge_role(mut self, role: ChargeRole) -> Self {
        self.charge_role = role;
        self
    }

    pub fn with_parent(mut self, parent_tx_id: Uuid) -> Self {
        self.parent_tx_id = Some(parent_tx_id);
        self
    }

    pub fn with_exchange_rate(mut self, rate: Decimal) -> Self {
        self.exchange_rate = Some(rate);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Field validation; runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        if self.from_account_id == self.to_account_id {
            return Err(AppError::Validation(
                "source and destination accounts must differ".to_string(),
            ));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(AppError::Validation("tenant id is required".to_string()));
        }
        let ref_ok = !self.external_ref.is_empty()
            && self.external_ref.len() <= 128
            && self.external_ref.chars().all(|c| c.is_ascii_graphic());
        if !ref_ok {
            return Err(AppError::Validation(
                "external_ref must be a printable string of at most 128 chars".to_string(),
            ));
        }
        if CurrencyCode::from_str(&self.currency).is_err() {
            return Err(AppError::Validation(format!(
                "invalid currency code '{}'",
                self.currency
            )));
        }
        Ok(())
    }
}

/// Pure balance computation for a posting: given both account snapshots,
/// decides whether the movement is authorized and what the balances become.
/// The engine runs this under row locks; property tests run it against an
/// in-memory model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingPlan {
    pub new_from: i64,
    pub new_to: i64,
}

impl PostingPlan {
    pub fn compute(from: &Account, to: &Account, amount: i64, currency: &str) -> Result<Self> {
        if !from.can_post() {
            return Err(AppError::AccountClosed(from.id.to_string()));
        }
        if !to.can_post() {
            return Err(AppError::AccountClosed(to.id.to_string()));
        }
        if from.currency != to.currency {
            return Err(AppError::MismatchedCurrency {
                source_currency: from.currency.clone(),
                destination: to.currency.clone(),
            });
        }
        if from.currency != currency {
            return Err(AppError::MismatchedCurrency {
                source_currency: currency.to_string(),
                destination: from.currency.clone(),
            });
        }

        let new_from = from
            .balance
            .checked_sub(amount)
            .ok_or_else(|| AppError::Validation("balance underflow".to_string()))?;
        let new_to = to
            .balance
            .checked_add(amount)
            .ok_or_else(|| AppError::Validation("balance overflow".to_string()))?;

        if !from.allow_negative && new_from < 0 {
            return Err(AppError::InsufficientFunds {
                account_id: from.id.to_string(),
                requested: amount,
                available: from.balance.max(0),
            });
        }
        if let Some(limit) = from.credit_limit {
            if from.allow_negative && new_from < -limit {
                return Err(AppError::CreditLimitExceeded {
                    account_id: from.id.to_string(),
                    projected: new_from,
                    credit_limit: limit,
                });
            }
        }

        Ok(Self { new_from, new_to })
    }
}

/// Result of a posting, including both entry rows and the balances the
/// accounts landed on.
#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub transaction: LedgerTransaction,
    pub debit_entry: LedgerEntry,
    pub credit_entry: LedgerEntry,
    pub from_balance: i64,
    pub to_balance: i64,
    /// True when the request replayed an already-accepted transaction.
    pub replayed: bool,
}

/// The double-entry posting engine. One call is one ACID unit of work: both
/// entries, the transaction row and both balance updates commit together or
/// not at all.
pub struct PostingEngine {
    pool: PgPool,
    transaction_repo: TransactionRepository,
    entry_repo: EntryRepository,
}

impl PostingEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transaction_repo: TransactionRepository::new(pool.clone()),
            entry_repo: EntryRepository::new(pool.clone()),
            pool,
        }
    }

    /// Posts a double-entry transaction.
    ///
    /// Replays are idempotent: a request whose (tenant, external_ref,
    /// charge_role) already exists returns the accepted transaction when the
    /// payload matches and `ConflictingReplay` when it does not.
    pub async fn execute(&self, request: PostRequest) -> Result<PostOutcome> {
        request.validate()?;

        // Cheap replay check before taking any row locks.
        if let Some(existing) = self
            .transaction_repo
            .find_by_external_ref(&request.tenant_id, &request.external_ref, request.charge_role)
            .await?
        {
            return self.build_replay_outcome(existing, &request).await;
        }

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        // Lock both accounts in id order so concurrent postings over the
        // same pair cannot deadlock.
        let (first_id, second_id) = if request.from_account_id < request.to_account_id {
            (request.from_account_id, request.to_account_id)
        } else {
            (request.to_account_id, request.from_account_id)
        };

        let first = Self::lock_account(&mut tx, first_id).await?;
        let second = Self::lock_account(&mut tx, second_id).await?;

        let (from, to) = if first.id == request.from_account_id {
            (first, second)
        } else {
            (second, first)
        };

        let plan = PostingPlan::compute(&from, &to, request.amount, &request.currency)?;

        let sequence = SequenceRepository::next_in_tx(&mut tx, &request.tenant_id).await?;

        let now = Utc::now();
        let inserted = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            INSERT INTO ledger_transactions (id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (tenant_id, external_ref, charge_role) DO NOTHING
            RETURNING id, tenant_id, type, charge_role, status, from_account_id, to_account_id, amount, currency, external_ref, parent_tx_id, exchange_rate, initiated_by, metadata, sequence, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.tenant_id)
        .bind(request.tx_type)
        .bind(request.charge_role)
        .bind(TransactionStatus::Posted)
        .bind(request.from_account_id)
        .bind(request.to_account_id)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(&request.external_ref)
        .bind(request.parent_tx_id)
        .bind(request.exchange_rate)
        .bind(&request.initiated_by)
        .bind(&request.metadata)
        .bind(sequence)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        let transaction = match inserted {
            Some(t) => t,
            None => {
                // A concurrent writer won the reference between our pre-check
                // and the insert; classify the replay against their row.
                tx.rollback().await.map_err(AppError::Database)?;
                let existing = self
                    .transaction_repo
                    .find_by_external_ref(
                        &request.tenant_id,
                        &request.external_ref,
                        request.charge_role,
                    )
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(anyhow::anyhow!(
                            "transaction for reference '{}' vanished after conflict",
                            request.external_ref
                        ))
                    })?;
                return self.build_replay_outcome(existing, &request).await;
            }
        };

        // Debit entry first, then credit; both carry the transaction's
        // sequence and the balance the account lands on.
        let debit_entry = Self::insert_entry(
            &mut tx,
            LedgerEntry::debit(
                transaction.id,
                from.id,
                request.amount,
                request.currency.clone(),
                plan.new_from,
                sequence,
            ),
        )
        .await?;

        let credit_entry = Self::insert_entry(
            &mut tx,
            LedgerEntry::credit(
                transaction.id,
                to.id,
                request.amount,
                request.currency.clone(),
                plan.new_to,
                sequence,
            ),
        )
        .await?;

        Self::write_balance(&mut tx, from.id, from.balance, plan.new_from).await?;
        Self::write_balance(&mut tx, to.id, to.balance, plan.new_to).await?;

        tx.commit().await.map_err(AppError::Database)?;

        Ok(PostOutcome {
            transaction,
            debit_entry,
            credit_entry,
            from_balance: plan.new_from,
            to_balance: plan.new_to,
            replayed: false,
        })
    }

    /// Reverses a posted transaction: a symmetric transaction with
    /// `parent_tx_id` set and a deterministic reference, so repeated calls
    /// replay the same reversal.
    pub async fn reverse(
        &self,
        tx_id: Uuid,
        reason: Option<&str>,
        initiated_by: &str,
    ) -> Result<PostOutcome> {
        let original = self
            .transaction_repo
            .find_by_id(tx_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction '{}' not found", tx_id)))?;

        if original.status != TransactionStatus::Posted {
            // Already reversed: return the existing reversal if present.
            if let Some(reversal) = self.transaction_repo.find_reversal_of(tx_id).await? {
                let entries = self.entry_repo.find_by_transaction(reversal.id).await?;
                return self.outcome_from_rows(reversal, entries, true);
            }
            return Err(AppError::Validation(format!(
                "transaction '{}' cannot be reversed from status {:?}",
                tx_id, original.status
            )));
        }

        let mut request = PostRequest::new(
            original.tenant_id.clone(),
            LedgerTransactionType::Refund,
            original.to_account_id,
            original.from_account_id,
            original.amount,
            original.currency.clone(),
            original.reversal_ref(),
            initiated_by,
        )
        .with_parent(original.id);

        if let Some(reason) = reason {
            request = request.with_metadata(serde_json::json!({ "reason": reason }));
        }

        let outcome = self.execute(request).await?;
        self.transaction_repo.mark_reversed(original.id).await?;

        Ok(outcome)
    }

    async fn lock_account(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<Account> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, tenant_id, user_id, subtype, currency, balance, allow_negative, credit_limit, status, created_at, updated_at
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound(format!("account '{}' not found", id)))
    }

    async fn insert_entry(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        entry: LedgerEntry,
    ) -> Result<LedgerEntry> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO ledger_entries (id, transaction_id, account_id, direction, amount, currency, balance_after, sequence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, transaction_id, account_id, direction, amount, currency, balance_after, sequence, created_at
            "#,
        )
        .bind(entry.id)
        .bind(entry.transaction_id)
        .bind(entry.account_id)
        .bind(entry.direction)
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(entry.balance_after)
        .bind(entry.sequence)
        .bind(entry.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(AppError::Database)
    }

    /// Compare-and-set on the balance. The FOR UPDATE lock already
    /// serialized us; the guard turns any violation of that assumption into
    /// a rollback instead of a corrupted balance.
    async fn write_balance(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        account_id: Uuid,
        expected: i64,
        new_balance: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3, updated_at = NOW()
            WHERE id = $1 AND balance = $2
            "#,
        )
        .bind(account_id)
        .bind(expected)
        .bind(new_balance)
        .execute(&mut **tx)
        .await
        .map_err(AppError::Database)?;

        if result.rows_affected() != 1 {
            return Err(AppError::Internal(anyhow::anyhow!(
                "balance of account '{}' moved under an exclusive lock",
                account_id
            )));
        }
        Ok(())
    }

    async fn build_replay_outcome(
        &self,
        existing: LedgerTransaction,
        request: &PostRequest,
    ) -> Result<PostOutcome> {
        if !existing.matches_payload(
            request.from_account_id,
            request.to_account_id,
            request.amount,
            &request.currency,
            request.tx_type,
        ) {
            return Err(AppError::ConflictingReplay(request.external_ref.clone()));
        }
        // A reference consumed by a since-reversed transaction is spent;
        // replaying it as a success would report money that moved back.
        if existing.status != TransactionStatus::Posted && existing.parent_tx_id.is_none() {
            return Err(AppError::ConflictingReplay(request.external_ref.clone()));
        }

        let entries = self.entry_repo.find_by_transaction(existing.id).await?;
        self.outcome_from_rows(existing, entries, true)
    }

    fn outcome_from_rows(
        &self,
        transaction: LedgerTransaction,
        entries: Vec<LedgerEntry>,
        replayed: bool,
    ) -> Result<PostOutcome> {
        let debit_entry = entries
            .iter()
            .find(|e| e.direction == crate::models::EntryDirection::Debit)
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("debit entry missing")))?;
        let credit_entry = entries
            .iter()
            .find(|e| e.direction == crate::models::EntryDirection::Credit)
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("credit entry missing")))?;

        let from_balance = debit_entry.balance_after;
        let to_balance = credit_entry.balance_after;

        Ok(PostOutcome {
            transaction,
            debit_entry,
            credit_entry,
            from_balance,
            to_balance,
            replayed,
        })
    }
}
