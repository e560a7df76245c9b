use crate::error::Result;
use crate::models::{Transfer, TransferStatus};
use crate::repositories::TransferRepository;
use sqlx::PgPool;

/// Classification of an external reference against prior operations.
#[derive(Debug, Clone)]
pub enum DuplicateCheck {
    /// Nothing bound to this reference; proceed.
    Fresh,
    /// A non-terminal operation holds the reference; reject.
    InFlight(Transfer),
    /// A completed operation holds the reference; replay its result.
    Replay(Transfer),
    /// A failed or cancelled operation held it; a new attempt may proceed
    /// under a fresh transfer row after the old one is cleared.
    PriorAttemptFailed(Transfer),
}

/// Duplicate guard over the transfers table. The classification here is the
/// fast path; the unique index on `(tenant, external_ref, charge_role)` in
/// the ledger remains the final arbiter under races.
pub struct DuplicateGuard {
    transfer_repo: TransferRepository,
}

impl DuplicateGuard {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transfer_repo: TransferRepository::new(pool),
        }
    }

    pub async fn check(&self, tenant_id: &str, external_ref: &str) -> Result<DuplicateCheck> {
        let existing = self
            .transfer_repo
            .find_by_external_ref(tenant_id, external_ref)
            .await?;

        Ok(match existing {
            None => DuplicateCheck::Fresh,
            Some(transfer) => match transfer.status {
                TransferStatus::Pending | TransferStatus::Active => {
                    DuplicateCheck::InFlight(transfer)
                }
                TransferStatus::Completed => DuplicateCheck::Replay(transfer),
                TransferStatus::Failed | TransferStatus::Cancelled => {
                    DuplicateCheck::PriorAttemptFailed(transfer)
                }
            },
        })
    }
}
