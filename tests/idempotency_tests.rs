mod common;

use ledger_engine::idempotency::{DuplicateCheck, DuplicateGuard};
use ledger_engine::models::{Transfer, TransferStatus};
use ledger_engine::repositories::TransferRepository;

async fn seeded_transfer(
    pool: &sqlx::PgPool,
    tenant: &str,
    external_ref: &str,
    status: TransferStatus,
) -> Transfer {
    let transfers = TransferRepository::new(pool.clone());
    let mut transfer = Transfer::new(tenant, "u1", "u2", 10_000, "EUR", 0, external_ref);
    transfer.status = status;
    transfers
        .try_insert(&transfer)
        .await
        .expect("insert failed")
        .expect("reference conflict")
}

#[tokio::test]
async fn test_fresh_reference_passes() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let guard = DuplicateGuard::new(pool.clone());

    let check = guard.check(&tenant, "never-seen").await.expect("check failed");
    assert!(matches!(check, DuplicateCheck::Fresh));

    common::cleanup_tenant(&pool, &tenant).await;
}

#[tokio::test]
async fn test_in_flight_reference_rejects() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let guard = DuplicateGuard::new(pool.clone());

    seeded_transfer(&pool, &tenant, "busy-ref", TransferStatus::Active).await;

    let check = guard.check(&tenant, "busy-ref").await.expect("check failed");
    assert!(matches!(check, DuplicateCheck::InFlight(_)));

    common::cleanup_tenant(&pool, &tenant).await;
}

#[tokio::test]
async fn test_completed_reference_replays() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let guard = DuplicateGuard::new(pool.clone());

    let transfer = seeded_transfer(&pool, &tenant, "done-ref", TransferStatus::Completed).await;

    let check = guard.check(&tenant, "done-ref").await.expect("check failed");
    match check {
        DuplicateCheck::Replay(prior) => assert_eq!(prior.id, transfer.id),
        other => panic!("expected replay, got {:?}", other),
    }

    common::cleanup_tenant(&pool, &tenant).await;
}

#[tokio::test]
async fn test_cancelled_reference_allows_retry() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let guard = DuplicateGuard::new(pool.clone());
    let transfers = TransferRepository::new(pool.clone());

    seeded_transfer(&pool, &tenant, "retry-ref", TransferStatus::Cancelled).await;

    let check = guard.check(&tenant, "retry-ref").await.expect("check failed");
    assert!(matches!(check, DuplicateCheck::PriorAttemptFailed(_)));

    // A cancelled attempt releases the unique slot for a fresh row.
    let mut retry = Transfer::new(&tenant, "u1", "u2", 10_000, "EUR", 0, "retry-ref");
    retry.status = TransferStatus::Active;
    let inserted = transfers.try_insert(&retry).await.expect("insert failed");
    assert!(inserted.is_some());

    common::cleanup_tenant(&pool, &tenant).await;
}

#[tokio::test]
async fn test_active_reference_blocks_second_row() {
    let pool = common::setup_test_db().await;
    let tenant = common::unique_tenant();
    let transfers = TransferRepository::new(pool.clone());

    seeded_transfer(&pool, &tenant, "held-ref", TransferStatus::Active).await;

    let duplicate = Transfer::new(&tenant, "u3", "u4", 999, "EUR", 0, "held-ref");
    let inserted = transfers.try_insert(&duplicate).await.expect("insert failed");
    assert!(inserted.is_none());

    common::cleanup_tenant(&pool, &tenant).await;
}
