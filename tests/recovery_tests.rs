mod common;

use ledger_engine::models::{
    AccountPolicy, AccountSubtype, CompensationRecord, LedgerTransactionType, SagaState,
    SagaStatus, StepRecord, TransactionStatus, Transfer, TransferStatus,
};
use ledger_engine::repositories::TransferRepository;
use ledger_engine::saga::{HeartbeatStore, InMemoryHeartbeatStore, RecoveryService};
use ledger_engine::services::PostRequest;
use std::sync::Arc;
use uuid::Uuid;

fn recovery_service(
    pool: &sqlx::PgPool,
    store: Arc<InMemoryHeartbeatStore>,
) -> RecoveryService {
    RecoveryService::new(
        store,
        common::ledger_service(pool),
        common::wallet_service(pool),
        pool.clone(),
        common::fast_saga_settings(),
    )
}

fn in_progress_state(compensations: Vec<CompensationRecord>) -> SagaState {
    let mut state = SagaState::new(
        Uuid::new_v4(),
        "deposit",
        vec![
            StepRecord::pending("post_ledger", true),
            StepRecord::pending("persist_transfer", true),
            StepRecord::pending("sync_wallets", true),
        ],
    );
    state.status = SagaStatus::InProgress;
    state.current_step = 2;
    state.steps[0].status = ledger_engine::models::StepStatus::Done;
    state.steps[1].status = ledger_engine::models::StepStatus::Done;
    state.steps[2].status = ledger_engine::models::StepStatus::Running;
    state.compensations = compensations;
    state
}

/// A worker that died after committing its ledger post: the heartbeat goes
/// stale, recovery compensates from persisted records, and the final ledger
/// state equals the pre-saga state.
#[tokio::test]
async fn test_stuck_saga_is_recovered_and_compensated() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let store = Arc::new(InMemoryHeartbeatStore::new());
    let accounts = common::account_service(&pool);
    let ledger = common::ledger_service(&pool);
    let transfers = TransferRepository::new(pool.clone());

    let source = accounts
        .get_or_create(&tenant, "sys", AccountSubtype::Main, "EUR", AccountPolicy::negative_allowed())
        .await
        .expect("source create failed");
    let dest = accounts
        .get_or_create(&tenant, "u1", AccountSubtype::Main, "EUR", AccountPolicy::strict())
        .await
        .expect("dest create failed");

    // The crashed worker had posted and persisted its transfer.
    let outcome = ledger
        .post(PostRequest::new(
            &tenant,
            LedgerTransactionType::Deposit,
            source.id,
            dest.id,
            60_000,
            "EUR",
            "stuck-1",
            "test",
        ))
        .await
        .expect("post failed");

    let mut transfer = Transfer::new(&tenant, "sys", "u1", 60_000, "EUR", 0, "stuck-1");
    transfer.status = TransferStatus::Active;
    transfer.debit_tx_id = Some(outcome.transaction.id);
    let transfer = transfers
        .try_insert(&transfer)
        .await
        .expect("insert failed")
        .expect("transfer conflict");

    let state = in_progress_state(vec![
        CompensationRecord::ReverseTransaction {
            tx_id: outcome.transaction.id,
        },
        CompensationRecord::CancelTransfer {
            transfer_id: transfer.id,
        },
        CompensationRecord::ResyncWallets {
            tenant_id: tenant.clone(),
            user_ids: vec!["sys".to_string(), "u1".to_string()],
            currency: "EUR".to_string(),
        },
    ]);
    let saga_id = state.saga_id;
    store.put(&state, 600_000).await.expect("put failed");

    // Nothing happens while the heartbeat is fresh.
    let recovery = recovery_service(&pool, store.clone());
    assert_eq!(recovery.scan_once().await.expect("scan failed"), 0);

    // Age the heartbeat past the stuck threshold.
    store.age_heartbeat(saga_id, chrono::Duration::seconds(30)).await;
    assert_eq!(recovery.scan_once().await.expect("scan failed"), 1);

    // Ledger equals pre-saga state.
    let source_balance = ledger.get_balance(source.id).await.expect("balance failed");
    let dest_balance = ledger.get_balance(dest.id).await.expect("balance failed");
    assert_eq!(source_balance.balance, 0);
    assert_eq!(dest_balance.balance, 0);

    let original = ledger
        .get_transaction(outcome.transaction.id)
        .await
        .expect("tx lookup failed");
    assert_eq!(original.status, TransactionStatus::Reversed);

    let transfer = transfers
        .find_by_id(transfer.id)
        .await
        .expect("transfer lookup failed")
        .expect("transfer missing");
    assert_eq!(transfer.status, TransferStatus::Cancelled);

    // The saga landed in Recovered with the timeout recorded, durably too.
    let recovered = store.fetch(saga_id).await.expect("fetch failed").expect("state gone");
    assert_eq!(recovered.status, SagaStatus::Recovered);
    assert_eq!(recovered.error.as_deref(), Some("heartbeat_timeout"));

    let audit: (String, Option<String>) =
        sqlx::query_as("SELECT status, error FROM saga_outcomes WHERE saga_id = $1")
            .bind(saga_id)
            .fetch_one(&pool)
            .await
            .expect("audit row missing");
    assert_eq!(audit.0, "recovered");
    assert_eq!(audit.1.as_deref(), Some("heartbeat_timeout"));

    common::cleanup_tenant(&pool, &tenant).await;
}

#[tokio::test]
async fn test_recovery_is_idempotent_across_scans() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let store = Arc::new(InMemoryHeartbeatStore::new());
    let accounts = common::account_service(&pool);
    let ledger = common::ledger_service(&pool);

    let source = accounts
        .get_or_create(&tenant, "sys", AccountSubtype::Main, "EUR", AccountPolicy::negative_allowed())
        .await
        .expect("source create failed");
    let dest = accounts
        .get_or_create(&tenant, "u1", AccountSubtype::Main, "EUR", AccountPolicy::strict())
        .await
        .expect("dest create failed");

    let outcome = ledger
        .post(PostRequest::new(
            &tenant,
            LedgerTransactionType::Deposit,
            source.id,
            dest.id,
            10_000,
            "EUR",
            "stuck-2",
            "test",
        ))
        .await
        .expect("post failed");

    let state = in_progress_state(vec![CompensationRecord::ReverseTransaction {
        tx_id: outcome.transaction.id,
    }]);
    let saga_id = state.saga_id;
    store.put(&state, 600_000).await.expect("put failed");
    store.age_heartbeat(saga_id, chrono::Duration::seconds(30)).await;

    let recovery = recovery_service(&pool, store.clone());
    assert_eq!(recovery.scan_once().await.expect("scan failed"), 1);

    // Force a second pass over the same (now terminal) saga plus a replayed
    // reversal: balances must not move again.
    let mut stale_again = store.fetch(saga_id).await.expect("fetch failed").expect("state gone");
    stale_again.status = SagaStatus::InProgress;
    store.put(&stale_again, 600_000).await.expect("put failed");
    store.age_heartbeat(saga_id, chrono::Duration::seconds(30)).await;
    assert_eq!(recovery.scan_once().await.expect("scan failed"), 1);

    let source_balance = ledger.get_balance(source.id).await.expect("balance failed");
    let dest_balance = ledger.get_balance(dest.id).await.expect("balance failed");
    assert_eq!(source_balance.balance, 0);
    assert_eq!(dest_balance.balance, 0);

    common::cleanup_tenant(&pool, &tenant).await;
}

#[tokio::test]
async fn test_terminal_sagas_are_left_alone() {
    let pool = common::setup_test_db().await;
    let store = Arc::new(InMemoryHeartbeatStore::new());

    let mut state = in_progress_state(vec![]);
    state.status = SagaStatus::Completed;
    let saga_id = state.saga_id;
    store.put(&state, 600_000).await.expect("put failed");
    store.age_heartbeat(saga_id, chrono::Duration::seconds(120)).await;

    let recovery = recovery_service(&pool, store.clone());
    assert_eq!(recovery.scan_once().await.expect("scan failed"), 0);

    let untouched = store.fetch(saga_id).await.expect("fetch failed").expect("state gone");
    assert_eq!(untouched.status, SagaStatus::Completed);
}
