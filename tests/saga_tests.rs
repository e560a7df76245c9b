mod common;

use async_trait::async_trait;
use ledger_engine::error::AppError;
use ledger_engine::models::{
    AccountPolicy, AccountSubtype, CompensationRecord, LedgerTransactionType, SagaStatus,
    TransactionStatus, Transfer, TransferStatus,
};
use ledger_engine::saga::{
    CompensationLog, HeartbeatStore, InMemoryHeartbeatStore, SagaCoordinator, SagaOptions, SagaStep,
};
use ledger_engine::services::PostRequest;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Scripted context recording the execution trace.
#[derive(Default)]
struct ScriptedContext {
    trace: Vec<String>,
    records: Vec<CompensationRecord>,
}

impl CompensationLog for ScriptedContext {
    fn compensations(&self) -> Vec<CompensationRecord> {
        self.records.clone()
    }
}

struct OkStep {
    name: &'static str,
}

struct FailStep {
    name: &'static str,
    critical: bool,
}

struct FlakyStep {
    attempts: Arc<AtomicU32>,
    fail_times: u32,
}

#[async_trait]
impl SagaStep<ScriptedContext> for OkStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, ctx: &mut ScriptedContext) -> ledger_engine::error::Result<()> {
        ctx.trace.push(format!("run:{}", self.name));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut ScriptedContext) -> ledger_engine::error::Result<()> {
        ctx.trace.push(format!("undo:{}", self.name));
        Ok(())
    }
}

#[async_trait]
impl SagaStep<ScriptedContext> for FailStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn execute(&self, ctx: &mut ScriptedContext) -> ledger_engine::error::Result<()> {
        ctx.trace.push(format!("run:{}", self.name));
        Err(AppError::Validation(format!("{} exploded", self.name)))
    }
}

#[async_trait]
impl SagaStep<ScriptedContext> for FlakyStep {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn execute(&self, ctx: &mut ScriptedContext) -> ledger_engine::error::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.trace.push(format!("attempt:{}", attempt));
        if attempt <= self.fail_times {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

async fn coordinator(pool: &sqlx::PgPool) -> (SagaCoordinator, Arc<InMemoryHeartbeatStore>) {
    let store = Arc::new(InMemoryHeartbeatStore::new());
    (
        SagaCoordinator::new(store.clone(), pool.clone(), common::fast_saga_settings()),
        store,
    )
}

#[tokio::test]
async fn test_successful_saga_runs_all_steps() {
    let pool = common::setup_test_db().await;
    let (coordinator, store) = coordinator(&pool).await;

    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> = vec![
        Box::new(OkStep { name: "one" }),
        Box::new(OkStep { name: "two" }),
        Box::new(OkStep { name: "three" }),
    ];

    let report = coordinator
        .run("test_op", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    assert!(report.success());
    assert_eq!(report.status, SagaStatus::Completed);
    assert_eq!(ctx.trace, vec!["run:one", "run:two", "run:three"]);

    let state = store.fetch(report.saga_id).await.expect("fetch failed").expect("state gone");
    assert_eq!(state.status, SagaStatus::Completed);
    assert!(state.completed_at.is_some());
}

#[tokio::test]
async fn test_critical_failure_compensates_in_reverse_order() {
    let pool = common::setup_test_db().await;
    let (coordinator, store) = coordinator(&pool).await;

    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> = vec![
        Box::new(OkStep { name: "one" }),
        Box::new(OkStep { name: "two" }),
        Box::new(FailStep { name: "boom", critical: true }),
        Box::new(OkStep { name: "never" }),
    ];

    let report = coordinator
        .run("test_op", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    assert!(!report.success());
    assert_eq!(report.status, SagaStatus::Compensated);
    assert!(matches!(report.error, Some(AppError::Validation(_))));
    assert_eq!(
        ctx.trace,
        vec!["run:one", "run:two", "run:boom", "undo:two", "undo:one"]
    );

    let state = store.fetch(report.saga_id).await.expect("fetch failed").expect("state gone");
    assert_eq!(state.status, SagaStatus::Compensated);
    assert_eq!(state.error.as_deref(), Some("validation error: boom exploded"));
}

#[tokio::test]
async fn test_non_critical_failure_does_not_abort() {
    let pool = common::setup_test_db().await;
    let (coordinator, _store) = coordinator(&pool).await;

    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> = vec![
        Box::new(OkStep { name: "one" }),
        Box::new(FailStep { name: "advisory", critical: false }),
        Box::new(OkStep { name: "two" }),
    ];

    let report = coordinator
        .run("test_op", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    assert!(report.success());
    assert_eq!(ctx.trace, vec!["run:one", "run:advisory", "run:two"]);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let pool = common::setup_test_db().await;
    let (coordinator, _store) = coordinator(&pool).await;

    let attempts = Arc::new(AtomicU32::new(0));
    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> = vec![Box::new(FlakyStep {
        attempts: attempts.clone(),
        fail_times: 2,
    })];

    let report = coordinator
        .run("test_op", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    assert!(report.success());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_business_errors_are_not_retried() {
    let pool = common::setup_test_db().await;
    let (coordinator, _store) = coordinator(&pool).await;

    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> = vec![
        Box::new(FailStep { name: "rejected", critical: true }),
    ];

    let report = coordinator
        .run("test_op", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    assert!(!report.success());
    // One run entry: the deterministic failure was not retried.
    assert_eq!(ctx.trace, vec!["run:rejected"]);
}

#[tokio::test]
async fn test_cancellation_is_polled_between_steps() {
    let pool = common::setup_test_db().await;
    let (coordinator, _store) = coordinator(&pool).await;

    let cancel = Arc::new(AtomicBool::new(true));
    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> = vec![
        Box::new(OkStep { name: "one" }),
        Box::new(OkStep { name: "two" }),
    ];

    let report = coordinator
        .run(
            "test_op",
            steps,
            &mut ctx,
            SagaOptions {
                cancel: Some(cancel),
                ..SagaOptions::default()
            },
        )
        .await
        .expect("saga run failed");

    assert!(!report.success());
    assert!(ctx.trace.is_empty());
}

#[tokio::test]
async fn test_terminal_outcome_is_audited_durably() {
    let pool = common::setup_test_db().await;
    let (coordinator, _store) = coordinator(&pool).await;

    let mut ctx = ScriptedContext::default();
    let steps: Vec<Box<dyn SagaStep<ScriptedContext>>> =
        vec![Box::new(OkStep { name: "only" })];

    let report = coordinator
        .run("audited_op", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    let row: (String, String) =
        sqlx::query_as("SELECT op_type, status FROM saga_outcomes WHERE saga_id = $1")
            .bind(report.saga_id)
            .fetch_one(&pool)
            .await
            .expect("audit row missing");
    assert_eq!(row.0, "audited_op");
    assert_eq!(row.1, "completed");
}

/// A deposit-shaped saga where the step after the ledger posts fails:
/// compensation must reverse the posts and cancel the transfer, and the
/// wallet must reconcile to its pre-saga value.
#[tokio::test]
async fn test_money_saga_compensation_restores_ledger_state() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let (coordinator, _store) = coordinator(&pool).await;
    let ledger = common::ledger_service(&pool);
    let accounts = common::account_service(&pool);
    let wallets = common::wallet_service(&pool);

    let source = accounts
        .get_or_create(&tenant, "sys", AccountSubtype::Main, "EUR", AccountPolicy::negative_allowed())
        .await
        .expect("source create failed");
    let dest = accounts
        .get_or_create(&tenant, "u1", AccountSubtype::Main, "EUR", AccountPolicy::strict())
        .await
        .expect("dest create failed");

    struct MoneyContext {
        ledger: Arc<ledger_engine::services::LedgerService>,
        transfers: ledger_engine::repositories::TransferRepository,
        tenant: String,
        from: Uuid,
        to: Uuid,
        tx_id: Option<Uuid>,
        transfer_id: Option<Uuid>,
        records: Vec<CompensationRecord>,
    }

    impl CompensationLog for MoneyContext {
        fn compensations(&self) -> Vec<CompensationRecord> {
            self.records.clone()
        }
    }

    struct PostStep;
    struct PersistStep;
    struct InjectedFailure;

    #[async_trait]
    impl SagaStep<MoneyContext> for PostStep {
        fn name(&self) -> &'static str {
            "post_ledger"
        }

        async fn execute(&self, ctx: &mut MoneyContext) -> ledger_engine::error::Result<()> {
            let outcome = ctx
                .ledger
                .post(PostRequest::new(
                    &ctx.tenant,
                    LedgerTransactionType::Deposit,
                    ctx.from,
                    ctx.to,
                    40_000,
                    "EUR",
                    "saga-comp-1",
                    "test",
                ))
                .await?;
            ctx.records.push(CompensationRecord::ReverseTransaction {
                tx_id: outcome.transaction.id,
            });
            ctx.tx_id = Some(outcome.transaction.id);
            Ok(())
        }

        async fn compensate(&self, ctx: &mut MoneyContext) -> ledger_engine::error::Result<()> {
            if let Some(tx_id) = ctx.tx_id {
                ctx.ledger.reverse(tx_id, Some("compensation"), "saga").await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SagaStep<MoneyContext> for PersistStep {
        fn name(&self) -> &'static str {
            "persist_transfer"
        }

        async fn execute(&self, ctx: &mut MoneyContext) -> ledger_engine::error::Result<()> {
            let mut transfer =
                Transfer::new(&ctx.tenant, "sys", "u1", 40_000, "EUR", 0, "saga-comp-1");
            transfer.status = TransferStatus::Active;
            transfer.debit_tx_id = ctx.tx_id;
            let inserted = ctx
                .transfers
                .try_insert(&transfer)
                .await?
                .expect("transfer insert lost a race");
            ctx.records.push(CompensationRecord::CancelTransfer {
                transfer_id: inserted.id,
            });
            ctx.transfer_id = Some(inserted.id);
            Ok(())
        }

        async fn compensate(&self, ctx: &mut MoneyContext) -> ledger_engine::error::Result<()> {
            if let Some(transfer_id) = ctx.transfer_id {
                ctx.transfers.cancel_if_open(transfer_id).await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SagaStep<MoneyContext> for InjectedFailure {
        fn name(&self) -> &'static str {
            "sync_wallets"
        }

        async fn execute(&self, _ctx: &mut MoneyContext) -> ledger_engine::error::Result<()> {
            Err(AppError::Internal(anyhow::anyhow!("injected wallet failure")))
        }
    }

    let mut ctx = MoneyContext {
        ledger: ledger.clone(),
        transfers: ledger_engine::repositories::TransferRepository::new(pool.clone()),
        tenant: tenant.clone(),
        from: source.id,
        to: dest.id,
        tx_id: None,
        transfer_id: None,
        records: Vec::new(),
    };

    let steps: Vec<Box<dyn SagaStep<MoneyContext>>> = vec![
        Box::new(PostStep),
        Box::new(PersistStep),
        Box::new(InjectedFailure),
    ];

    let report = coordinator
        .run("deposit", steps, &mut ctx, SagaOptions::default())
        .await
        .expect("saga run failed");

    assert!(!report.success());
    assert_eq!(report.status, SagaStatus::Compensated);

    // The forward post was reversed: both balances returned to zero.
    let source_balance = ledger.get_balance(source.id).await.expect("balance failed");
    let dest_balance = ledger.get_balance(dest.id).await.expect("balance failed");
    assert_eq!(source_balance.balance, 0);
    assert_eq!(dest_balance.balance, 0);

    let tx = ledger
        .get_transaction(ctx.tx_id.expect("tx id missing"))
        .await
        .expect("tx lookup failed");
    assert_eq!(tx.status, TransactionStatus::Reversed);

    // The transfer aggregate landed Cancelled.
    let transfer = ctx
        .transfers
        .find_by_id(ctx.transfer_id.expect("transfer id missing"))
        .await
        .expect("transfer lookup failed")
        .expect("transfer missing");
    assert_eq!(transfer.status, TransferStatus::Cancelled);

    // A fresh sync converges the wallet to the pre-saga value.
    let wallet = wallets
        .sync_from_ledger(&tenant, "u1", "EUR", "main")
        .await
        .expect("sync failed");
    assert_eq!(wallet.balance, 0);

    common::cleanup_tenant(&pool, &tenant).await;
}
