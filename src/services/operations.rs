use crate::error::{AppError, Result};
use crate::events::{EventPublisher, WalletOpEvent};
use crate::idempotency::{DuplicateCheck, DuplicateGuard, KeyGenerator, OperationFingerprint};
use crate::models::{
    Account, AccountPolicy, AccountSubtype, ChargeRole, CompensationRecord, CurrencyCode,
    LedgerTransaction, LedgerTransactionType, Metadata, Transfer, TransferStatus, Wallet,
};
use crate::repositories::TransferRepository;
use crate::saga::{CompensationLog, SagaCoordinator, SagaOptions, SagaStep};
use crate::services::fee_policy::FeePolicy;
use crate::services::permission_oracle::PermissionOracle;
use crate::services::posting_engine::PostRequest;
use crate::services::{AccountService, LedgerService, WalletService};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The three composite money operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl OperationKind {
    pub fn op_type(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdrawal => "withdrawal",
            OperationKind::Transfer => "transfer",
        }
    }

    pub fn ledger_type(&self) -> LedgerTransactionType {
        match self {
            OperationKind::Deposit => LedgerTransactionType::Deposit,
            OperationKind::Withdrawal => LedgerTransactionType::Withdrawal,
            OperationKind::Transfer => LedgerTransactionType::Transfer,
        }
    }

    /// Peer-to-peer transfers carry no fee; deposits and withdrawals use
    /// the configured policy.
    fn charges_fees(&self) -> bool {
        !matches!(self, OperationKind::Transfer)
    }
}

/// Input of a money operation.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub tenant_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    /// Gross amount in minor units of `currency`.
    pub amount: i64,
    pub currency: String,
    /// Set for cross-currency movement; same as `currency` otherwise.
    pub destination_currency: Option<String>,
    /// Required when the destination currency differs; consumed, never
    /// computed here.
    pub exchange_rate: Option<Decimal>,
    pub method: Option<String>,
    pub external_ref: Option<String>,
    pub metadata: Option<Metadata>,
    pub initiated_by: String,
}

impl OperationRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            amount,
            currency: currency.into(),
            destination_currency: None,
            exchange_rate: None,
            method: None,
            external_ref: None,
            metadata: None,
            initiated_by: "api".to_string(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_conversion(mut self, destination_currency: impl Into<String>, rate: Decimal) -> Self {
        self.destination_currency = Some(destination_currency.into());
        self.exchange_rate = Some(rate);
        self
    }

    pub fn with_initiator(mut self, initiated_by: impl Into<String>) -> Self {
        self.initiated_by = initiated_by.into();
        self
    }

    fn destination_currency(&self) -> &str {
        self.destination_currency.as_deref().unwrap_or(&self.currency)
    }

    fn is_cross_currency(&self) -> bool {
        self.destination_currency() != self.currency
    }

    /// Schema validation; runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(AppError::Validation("tenant id is required".to_string()));
        }
        if self.from_user_id.trim().is_empty() || self.to_user_id.trim().is_empty() {
            return Err(AppError::Validation("both user ids are required".to_string()));
        }
        if self.from_user_id == self.to_user_id {
            return Err(AppError::Validation(
                "source and destination users must differ".to_string(),
            ));
        }
        if CurrencyCode::from_str(&self.currency).is_err() {
            return Err(AppError::Validation(format!(
                "invalid currency code '{}'",
                self.currency
            )));
        }
        if let Some(dest) = &self.destination_currency {
            if CurrencyCode::from_str(dest).is_err() {
                return Err(AppError::Validation(format!(
                    "invalid destination currency code '{}'",
                    dest
                )));
            }
        }
        if self.is_cross_currency() {
            match self.exchange_rate {
                Some(rate) if rate > Decimal::ZERO => {}
                _ => {
                    return Err(AppError::Validation(
                        "cross-currency operations require a positive exchange rate".to_string(),
                    ))
                }
            }
        }
        if let Some(ref external_ref) = self.external_ref {
            let ok = !external_ref.is_empty()
                && external_ref.len() <= 128
                && external_ref.chars().all(|c| c.is_ascii_graphic());
            if !ok {
                return Err(AppError::Validation(
                    "external_ref must be a printable string of at most 128 chars".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Result of a money operation, mirroring the saga's terminal state.
#[derive(Debug)]
pub struct OperationResult {
    pub success: bool,
    pub transfer: Option<Transfer>,
    pub debit_tx: Option<LedgerTransaction>,
    pub credit_tx: Option<LedgerTransaction>,
    pub fee_tx: Option<LedgerTransaction>,
    pub saga_id: Uuid,
    /// True when an identical prior operation was replayed.
    pub replayed: bool,
    pub error: Option<AppError>,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
}

/// Shared collaborators of the operation sagas.
pub struct OperationDeps {
    pub ledger: Arc<LedgerService>,
    pub accounts: Arc<AccountService>,
    pub wallets: Arc<WalletService>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub fees: FeePolicy,
    pub keys: KeyGenerator,
    pub events: EventPublisher,
    pub transfers: TransferRepository,
    pub guard: DuplicateGuard,
}

impl OperationDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        ledger: Arc<LedgerService>,
        accounts: Arc<AccountService>,
        wallets: Arc<WalletService>,
        permissions: Arc<dyn PermissionOracle>,
        fees: FeePolicy,
        keys: KeyGenerator,
        events: EventPublisher,
    ) -> Self {
        Self {
            ledger,
            accounts,
            wallets,
            permissions,
            fees,
            keys,
            events,
            transfers: TransferRepository::new(pool.clone()),
            guard: DuplicateGuard::new(pool),
        }
    }
}

/// Mutable state threaded through the saga steps.
pub struct OperationContext {
    kind: OperationKind,
    request: OperationRequest,
    deps: Arc<OperationDeps>,
    saga_id: Uuid,
    fee_amount: i64,
    net_amount: i64,
    external_ref: String,
    from_account: Option<Account>,
    to_account: Option<Account>,
    fee_account: Option<Account>,
    conversion_source: Option<Account>,
    conversion_destination: Option<Account>,
    debit_tx: Option<LedgerTransaction>,
    credit_tx: Option<LedgerTransaction>,
    fee_tx: Option<LedgerTransaction>,
    transfer: Option<Transfer>,
    /// Set when the guard classified this request as a replay of a
    /// completed operation; later steps become no-ops.
    replayed: bool,
    compensations: Vec<CompensationRecord>,
}

impl OperationContext {
    fn new(
        kind: OperationKind,
        request: OperationRequest,
        deps: Arc<OperationDeps>,
        saga_id: Uuid,
    ) -> Self {
        Self {
            kind,
            request,
            deps,
            saga_id,
            fee_amount: 0,
            net_amount: 0,
            external_ref: String::new(),
            from_account: None,
            to_account: None,
            fee_account: None,
            conversion_source: None,
            conversion_destination: None,
            debit_tx: None,
            credit_tx: None,
            fee_tx: None,
            transfer: None,
            replayed: false,
            compensations: Vec::new(),
        }
    }

    fn from_account(&self) -> Result<&Account> {
        self.from_account
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("source account not resolved")))
    }

    fn to_account(&self) -> Result<&Account> {
        self.to_account
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("destination account not resolved")))
    }
}

impl CompensationLog for OperationContext {
    fn compensations(&self) -> Vec<CompensationRecord> {
        self.compensations.clone()
    }
}

/// Converts a net source-currency amount into destination minor units.
fn convert_amount(net: i64, rate: Decimal) -> Result<i64> {
    let converted = (Decimal::from(net) * rate).floor();
    match converted.to_i64() {
        Some(v) if v > 0 => Ok(v),
        _ => Err(AppError::Validation(
            "conversion produced a non-positive destination amount".to_string(),
        )),
    }
}

struct ComputeFee;

#[async_trait]
impl SagaStep<OperationContext> for ComputeFee {
    fn name(&self) -> &'static str {
        "compute_fee"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        ctx.fee_amount = if ctx.kind.charges_fees() {
            ctx.deps
                .fees
                .compute(ctx.request.amount, ctx.request.method.as_deref())
        } else {
            0
        };
        ctx.net_amount = ctx.request.amount - ctx.fee_amount;
        Ok(())
    }
}

struct DeriveIdempotencyKey;

#[async_trait]
impl SagaStep<OperationContext> for DeriveIdempotencyKey {
    fn name(&self) -> &'static str {
        "derive_idempotency_key"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        ctx.external_ref = match ctx.request.external_ref.clone() {
            Some(explicit) => explicit,
            None => ctx.deps.keys.derive(&OperationFingerprint {
                tenant_id: ctx.request.tenant_id.clone(),
                op_type: ctx.kind.op_type().to_string(),
                from_user_id: ctx.request.from_user_id.clone(),
                to_user_id: ctx.request.to_user_id.clone(),
                amount: ctx.request.amount,
                currency: ctx.request.currency.clone(),
                method: ctx.request.method.clone(),
            }),
        };
        Ok(())
    }
}

struct GuardDuplicate;

#[async_trait]
impl SagaStep<OperationContext> for GuardDuplicate {
    fn name(&self) -> &'static str {
        "guard_duplicate"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        match ctx
            .deps
            .guard
            .check(&ctx.request.tenant_id, &ctx.external_ref)
            .await?
        {
            DuplicateCheck::Fresh | DuplicateCheck::PriorAttemptFailed(_) => Ok(()),
            DuplicateCheck::InFlight(_) => {
                Err(AppError::DuplicateOperation(ctx.external_ref.clone()))
            }
            DuplicateCheck::Replay(prior) => {
                info!(
                    external_ref = %ctx.external_ref,
                    transfer_id = %prior.id,
                    "replaying completed operation"
                );
                if let Some(tx_id) = prior.debit_tx_id {
                    ctx.debit_tx = Some(ctx.deps.ledger.get_transaction(tx_id).await?);
                }
                if let Some(tx_id) = prior.credit_tx_id {
                    ctx.credit_tx = Some(ctx.deps.ledger.get_transaction(tx_id).await?);
                }
                if let Some(tx_id) = prior.fee_tx_id {
                    ctx.fee_tx = Some(ctx.deps.ledger.get_transaction(tx_id).await?);
                }
                ctx.transfer = Some(prior);
                ctx.replayed = true;
                Ok(())
            }
        }
    }
}

struct EnsureAccounts;

#[async_trait]
impl SagaStep<OperationContext> for EnsureAccounts {
    fn name(&self) -> &'static str {
        "ensure_accounts"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        if ctx.replayed {
            return Ok(());
        }

        let request = &ctx.request;
        let tenant = request.tenant_id.clone();

        // The source's overdraft capability comes from the permission
        // oracle; it is frozen into the account at creation.
        let allow_negative = ctx
            .deps
            .permissions
            .allow_negative(&tenant, &request.from_user_id)
            .await?;
        let from_policy = if allow_negative {
            AccountPolicy::negative_allowed()
        } else {
            AccountPolicy::strict()
        };

        ctx.from_account = Some(
            ctx.deps
                .accounts
                .get_or_create(
                    &tenant,
                    &request.from_user_id,
                    AccountSubtype::Main,
                    &request.currency,
                    from_policy,
                )
                .await?,
        );
        ctx.to_account = Some(
            ctx.deps
                .accounts
                .get_or_create(
                    &tenant,
                    &request.to_user_id,
                    AccountSubtype::Main,
                    request.destination_currency(),
                    AccountPolicy::strict(),
                )
                .await?,
        );

        if ctx.fee_amount > 0 {
            ctx.fee_account = Some(
                ctx.deps
                    .accounts
                    .get_or_create(
                        &tenant,
                        &tenant,
                        AccountSubtype::Fee,
                        &request.currency,
                        AccountPolicy::strict(),
                    )
                    .await?,
            );
        }

        if request.is_cross_currency() {
            // Conversion accounts carry pending FX positions and are
            // reconciled out-of-band.
            ctx.conversion_source = Some(
                ctx.deps
                    .accounts
                    .get_or_create(
                        &tenant,
                        &tenant,
                        AccountSubtype::Conversion,
                        &request.currency,
                        AccountPolicy::negative_allowed(),
                    )
                    .await?,
            );
            ctx.conversion_destination = Some(
                ctx.deps
                    .accounts
                    .get_or_create(
                        &tenant,
                        &tenant,
                        AccountSubtype::Conversion,
                        request.destination_currency(),
                        AccountPolicy::negative_allowed(),
                    )
                    .await?,
            );
        }
        Ok(())
    }
}

struct PostLedger;

#[async_trait]
impl SagaStep<OperationContext> for PostLedger {
    fn name(&self) -> &'static str {
        "post_ledger"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        if ctx.replayed {
            return Ok(());
        }

        let from = ctx.from_account()?.clone();
        let to = ctx.to_account()?.clone();
        let metadata = ctx.request.metadata.clone().map(Metadata::into_value);

        if ctx.request.is_cross_currency() {
            let rate = ctx
                .request
                .exchange_rate
                .ok_or_else(|| AppError::Validation("exchange rate is required".to_string()))?;
            let conv_src = ctx
                .conversion_source
                .as_ref()
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("conversion account not resolved")))?
                .clone();
            let conv_dst = ctx
                .conversion_destination
                .as_ref()
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("conversion account not resolved")))?
                .clone();

            // Conversion pair: source leg into the source-currency
            // conversion account, then destination leg out of the
            // destination-currency one. Both share the reference.
            let mut debit_req = PostRequest::new(
                ctx.request.tenant_id.clone(),
                LedgerTransactionType::Conversion,
                from.id,
                conv_src.id,
                ctx.net_amount,
                ctx.request.currency.clone(),
                ctx.external_ref.clone(),
                ctx.request.initiated_by.clone(),
            )
            .with_exchange_rate(rate);
            if let Some(metadata) = metadata.clone() {
                debit_req = debit_req.with_metadata(metadata);
            }
            let debit = ctx.deps.ledger.post(debit_req).await?;
            ctx.compensations.push(CompensationRecord::ReverseTransaction {
                tx_id: debit.transaction.id,
            });
            ctx.debit_tx = Some(debit.transaction);

            let destination_amount = convert_amount(ctx.net_amount, rate)?;
            let credit_req = PostRequest::new(
                ctx.request.tenant_id.clone(),
                LedgerTransactionType::Conversion,
                conv_dst.id,
                to.id,
                destination_amount,
                ctx.request.destination_currency().to_string(),
                ctx.external_ref.clone(),
                ctx.request.initiated_by.clone(),
            )
            .with_charge_role(ChargeRole::Conversion)
            .with_exchange_rate(rate);
            let credit = ctx.deps.ledger.post(credit_req).await?;
            ctx.compensations.push(CompensationRecord::ReverseTransaction {
                tx_id: credit.transaction.id,
            });
            ctx.credit_tx = Some(credit.transaction);
        } else {
            let mut principal_req = PostRequest::new(
                ctx.request.tenant_id.clone(),
                ctx.kind.ledger_type(),
                from.id,
                to.id,
                ctx.net_amount,
                ctx.request.currency.clone(),
                ctx.external_ref.clone(),
                ctx.request.initiated_by.clone(),
            );
            if let Some(metadata) = metadata {
                principal_req = principal_req.with_metadata(metadata);
            }
            let principal = ctx.deps.ledger.post(principal_req).await?;
            ctx.compensations.push(CompensationRecord::ReverseTransaction {
                tx_id: principal.transaction.id,
            });
            ctx.debit_tx = Some(principal.transaction.clone());
            ctx.credit_tx = Some(principal.transaction);
        }

        if ctx.fee_amount > 0 {
            let fee_account = ctx
                .fee_account
                .as_ref()
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("fee account not resolved")))?
                .clone();

            let fee_req = PostRequest::new(
                ctx.request.tenant_id.clone(),
                LedgerTransactionType::Fee,
                from.id,
                fee_account.id,
                ctx.fee_amount,
                ctx.request.currency.clone(),
                ctx.external_ref.clone(),
                ctx.request.initiated_by.clone(),
            )
            .with_charge_role(ChargeRole::Fee);
            let fee = ctx.deps.ledger.post(fee_req).await?;
            ctx.compensations.push(CompensationRecord::ReverseTransaction {
                tx_id: fee.transaction.id,
            });
            ctx.fee_tx = Some(fee.transaction);
        }
        Ok(())
    }

    async fn compensate(&self, ctx: &mut OperationContext) -> Result<()> {
        // Reverse in the opposite order of posting; each reversal replays
        // idempotently through its deterministic reference.
        let posted: Vec<Uuid> = [&ctx.fee_tx, &ctx.credit_tx, &ctx.debit_tx]
            .into_iter()
            .flatten()
            .map(|tx| tx.id)
            .collect();

        let mut unique = posted;
        unique.dedup();
        for tx_id in unique {
            match ctx.deps.ledger.reverse(tx_id, Some("saga compensation"), "saga").await {
                Ok(_) => {}
                // Forward effect absent, nothing to undo.
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

struct PersistTransfer;

#[async_trait]
impl SagaStep<OperationContext> for PersistTransfer {
    fn name(&self) -> &'static str {
        "persist_transfer"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        if ctx.replayed {
            return Ok(());
        }

        let mut transfer = Transfer::new(
            ctx.request.tenant_id.clone(),
            ctx.request.from_user_id.clone(),
            ctx.request.to_user_id.clone(),
            ctx.request.amount,
            ctx.request.currency.clone(),
            ctx.fee_amount,
            ctx.external_ref.clone(),
        )
        .with_saga_id(ctx.saga_id);
        // Active mirrors the in-progress saga.
        transfer.status = TransferStatus::Active;
        transfer.debit_tx_id = ctx.debit_tx.as_ref().map(|t| t.id);
        transfer.credit_tx_id = ctx.credit_tx.as_ref().map(|t| t.id);
        transfer.fee_tx_id = ctx.fee_tx.as_ref().map(|t| t.id);
        if let Some(method) = ctx.request.method.clone() {
            transfer = transfer.with_method(method);
        }
        if let Some(metadata) = ctx.request.metadata.clone() {
            transfer = transfer.with_metadata(metadata.into_value());
        }

        match ctx.deps.transfers.try_insert(&transfer).await? {
            Some(inserted) => {
                ctx.compensations.push(CompensationRecord::CancelTransfer {
                    transfer_id: inserted.id,
                });
                ctx.transfer = Some(inserted);
                Ok(())
            }
            None => {
                // Lost a race on the reference after the guard passed.
                Err(AppError::DuplicateOperation(ctx.external_ref.clone()))
            }
        }
    }

    async fn compensate(&self, ctx: &mut OperationContext) -> Result<()> {
        if let Some(transfer) = &ctx.transfer {
            if !ctx.replayed {
                ctx.deps.transfers.cancel_if_open(transfer.id).await?;
            }
        }
        Ok(())
    }
}

struct SyncWallets;

#[async_trait]
impl SagaStep<OperationContext> for SyncWallets {
    fn name(&self) -> &'static str {
        "sync_wallets"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        if ctx.replayed {
            return Ok(());
        }

        let request = &ctx.request;
        ctx.compensations.push(CompensationRecord::ResyncWallets {
            tenant_id: request.tenant_id.clone(),
            user_ids: vec![request.from_user_id.clone(), request.to_user_id.clone()],
            currency: request.currency.clone(),
        });

        ctx.deps
            .wallets
            .sync_from_ledger(
                &request.tenant_id,
                &request.from_user_id,
                &request.currency,
                Wallet::DEFAULT_CATEGORY,
            )
            .await?;
        ctx.deps
            .wallets
            .sync_from_ledger(
                &request.tenant_id,
                &request.to_user_id,
                request.destination_currency(),
                Wallet::DEFAULT_CATEGORY,
            )
            .await?;

        // Advisory lifetime counters. The deposit counter lives on the
        // destination wallet, so it uses the destination-leg amount.
        let credited = ctx
            .credit_tx
            .as_ref()
            .map(|t| t.amount)
            .unwrap_or(ctx.net_amount);
        match ctx.kind {
            OperationKind::Deposit => {
                ctx.deps
                    .wallets
                    .record_lifetime(
                        &request.tenant_id,
                        &request.to_user_id,
                        request.destination_currency(),
                        Wallet::DEFAULT_CATEGORY,
                        credited,
                        0,
                        0,
                    )
                    .await?;
            }
            OperationKind::Withdrawal => {
                ctx.deps
                    .wallets
                    .record_lifetime(
                        &request.tenant_id,
                        &request.from_user_id,
                        &request.currency,
                        Wallet::DEFAULT_CATEGORY,
                        0,
                        ctx.request.amount,
                        ctx.fee_amount,
                    )
                    .await?;
            }
            OperationKind::Transfer => {}
        }
        Ok(())
    }

    async fn compensate(&self, ctx: &mut OperationContext) -> Result<()> {
        // Re-sync after reversals; convergence toward the ledger is the
        // compensation.
        let request = &ctx.request;
        ctx.deps
            .wallets
            .sync_from_ledger(
                &request.tenant_id,
                &request.from_user_id,
                &request.currency,
                Wallet::DEFAULT_CATEGORY,
            )
            .await?;
        ctx.deps
            .wallets
            .sync_from_ledger(
                &request.tenant_id,
                &request.to_user_id,
                request.destination_currency(),
                Wallet::DEFAULT_CATEGORY,
            )
            .await?;
        Ok(())
    }
}

struct FinalizeTransfer;

#[async_trait]
impl SagaStep<OperationContext> for FinalizeTransfer {
    fn name(&self) -> &'static str {
        "finalize_transfer"
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        if ctx.replayed {
            return Ok(());
        }
        let transfer = ctx
            .transfer
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transfer not persisted")))?;

        let completed = ctx
            .deps
            .transfers
            .transition(transfer.id, TransferStatus::Active, TransferStatus::Completed)
            .await?
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "transfer '{}' left Active state mid-saga",
                    transfer.id
                ))
            })?;
        ctx.transfer = Some(completed);
        Ok(())
    }
}

struct EmitEvent;

#[async_trait]
impl SagaStep<OperationContext> for EmitEvent {
    fn name(&self) -> &'static str {
        "emit_event"
    }

    fn critical(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut OperationContext) -> Result<()> {
        if ctx.replayed {
            return Ok(());
        }
        let transfer = ctx
            .transfer
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transfer not persisted")))?;

        let user_id = match ctx.kind {
            OperationKind::Withdrawal => ctx.request.from_user_id.clone(),
            _ => ctx.request.to_user_id.clone(),
        };

        ctx.deps.events.publish_wallet_completed(
            ctx.kind.op_type(),
            WalletOpEvent {
                tenant_id: ctx.request.tenant_id.clone(),
                user_id,
                currency: ctx.request.currency.clone(),
                amount: ctx.request.amount,
                transfer_id: transfer.id,
                tx_id: transfer.debit_tx_id,
                timestamp: chrono::Utc::now(),
            },
        );
        Ok(())
    }
}

/// Entry point for the composite money operations. Each operation is a saga
/// over the ledger, the transfer aggregate and the wallet projection.
pub struct OperationService {
    deps: Arc<OperationDeps>,
    coordinator: Arc<SagaCoordinator>,
}

impl OperationService {
    pub fn new(deps: Arc<OperationDeps>, coordinator: Arc<SagaCoordinator>) -> Self {
        Self { deps, coordinator }
    }

    pub async fn deposit(&self, request: OperationRequest) -> Result<OperationResult> {
        self.execute(OperationKind::Deposit, request).await
    }

    pub async fn withdraw(&self, request: OperationRequest) -> Result<OperationResult> {
        self.execute(OperationKind::Withdrawal, request).await
    }

    pub async fn transfer(&self, request: OperationRequest) -> Result<OperationResult> {
        self.execute(OperationKind::Transfer, request).await
    }

    async fn execute(&self, kind: OperationKind, request: OperationRequest) -> Result<OperationResult> {
        request.validate()?;

        let saga_id = Uuid::new_v4();
        let mut ctx = OperationContext::new(kind, request, self.deps.clone(), saga_id);

        let steps: Vec<Box<dyn SagaStep<OperationContext>>> = vec![
            Box::new(ComputeFee),
            Box::new(DeriveIdempotencyKey),
            Box::new(GuardDuplicate),
            Box::new(EnsureAccounts),
            Box::new(PostLedger),
            Box::new(PersistTransfer),
            Box::new(SyncWallets),
            Box::new(FinalizeTransfer),
            Box::new(EmitEvent),
        ];

        let report = self
            .coordinator
            .run(
                kind.op_type(),
                steps,
                &mut ctx,
                SagaOptions {
                    saga_id: Some(saga_id),
                    ..SagaOptions::default()
                },
            )
            .await?;

        let errors: Vec<String> = report.error.iter().map(|e| e.to_string()).collect();
        Ok(OperationResult {
            success: report.success(),
            transfer: ctx.transfer,
            debit_tx: ctx.debit_tx,
            credit_tx: ctx.credit_tx,
            fee_tx: ctx.fee_tx,
            saga_id: report.saga_id,
            replayed: ctx.replayed,
            error: report.error,
            errors,
            execution_time_ms: report.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> OperationRequest {
        OperationRequest::new("t1", "sys", "u1", 100_000, "EUR")
    }

    #[test]
    fn test_request_validation_rejects_zero_amount() {
        let mut r = request();
        r.amount = 0;
        assert!(matches!(r.validate().unwrap_err(), AppError::Validation(_)));
    }

    #[test]
    fn test_request_validation_rejects_self_transfer() {
        let mut r = request();
        r.to_user_id = "sys".to_string();
        assert!(matches!(r.validate().unwrap_err(), AppError::Validation(_)));
    }

    #[test]
    fn test_request_validation_requires_rate_for_conversion() {
        let mut r = request();
        r.destination_currency = Some("USD".to_string());
        assert!(matches!(r.validate().unwrap_err(), AppError::Validation(_)));

        let ok = request().with_conversion("USD", dec!(1.08));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_request_validation_accepts_same_currency() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_convert_amount_floors() {
        assert_eq!(convert_amount(97_100, dec!(1.08)).unwrap(), 104_868);
        assert_eq!(convert_amount(1, dec!(0.5)).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_operation_kind_fees() {
        assert!(OperationKind::Deposit.charges_fees());
        assert!(OperationKind::Withdrawal.charges_fees());
        assert!(!OperationKind::Transfer.charges_fees());
    }

    #[test]
    fn test_operation_kind_ledger_types() {
        assert_eq!(OperationKind::Deposit.ledger_type(), LedgerTransactionType::Deposit);
        assert_eq!(OperationKind::Withdrawal.ledger_type(), LedgerTransactionType::Withdrawal);
        assert_eq!(OperationKind::Transfer.ledger_type(), LedgerTransactionType::Transfer);
    }
}
