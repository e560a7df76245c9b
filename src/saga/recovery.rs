use crate::config::SagaSettings;
use crate::error::{AppError, Result};
use crate::models::{CompensationRecord, SagaOutcome, SagaState, SagaStatus, StepStatus};
use crate::observability::get_metrics;
use crate::repositories::{SagaAuditRepository, TransferRepository};
use crate::saga::heartbeat::HeartbeatStore;
use crate::services::{LedgerService, WalletService};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Scans the heartbeat store for sagas whose worker died and rolls them
/// back from persisted compensation records.
///
/// Everything applied here is idempotent: reversal goes through the
/// ledger's deterministic-reference replay path, transfer cancellation is a
/// no-op on terminal rows, and wallet resync converges.
pub struct RecoveryService {
    store: Arc<dyn HeartbeatStore>,
    ledger: Arc<LedgerService>,
    wallets: Arc<WalletService>,
    transfers: TransferRepository,
    audit: SagaAuditRepository,
    settings: SagaSettings,
    running: AtomicBool,
}

impl RecoveryService {
    pub fn new(
        store: Arc<dyn HeartbeatStore>,
        ledger: Arc<LedgerService>,
        wallets: Arc<WalletService>,
        pool: PgPool,
        settings: SagaSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            wallets,
            transfers: TransferRepository::new(pool.clone()),
            audit: SagaAuditRepository::new(pool),
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Runs the scan loop until `stop` is called.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let interval = Duration::from_millis(self.settings.recovery_scan_ms);
        info!(scan_interval_ms = self.settings.recovery_scan_ms, "recovery service started");

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.scan_once().await {
                warn!(error = %e, "recovery scan failed");
            }
            tokio::time::sleep(interval).await;
        }
        info!("recovery service stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One pass over the heartbeat store. Returns how many stuck sagas were
    /// recovered.
    pub async fn scan_once(&self) -> Result<usize> {
        let now = Utc::now();
        let states = self.store.scan_states().await?;

        let stuck: Vec<SagaState> = states
            .into_iter()
            .filter(|s| s.is_stuck(now, self.settings.stuck_threshold_ms))
            .collect();
        get_metrics().set_stuck_sagas(stuck.len() as i64);

        let mut recovered = 0;
        for state in stuck {
            match self.recover(state).await {
                Ok(()) => recovered += 1,
                Err(e) => warn!(error = %e, "failed to recover stuck saga"),
            }
        }
        Ok(recovered)
    }

    async fn recover(&self, mut state: SagaState) -> Result<()> {
        warn!(
            saga_id = %state.saga_id,
            op_type = %state.op_type,
            current_step = state.current_step,
            heartbeat_age_ms = state.heartbeat_age(Utc::now()).num_milliseconds(),
            "recovering stuck saga"
        );

        // Compensation records replay in reverse of the order the forward
        // effects landed.
        for record in state.compensations.clone().iter().rev() {
            self.apply_compensation(record).await?;
        }

        for step in state.steps.iter_mut() {
            if step.status == StepStatus::Done || step.status == StepStatus::Running {
                step.status = StepStatus::Compensated;
            } else if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }

        state.status = SagaStatus::Recovered;
        state.error = Some("heartbeat_timeout".to_string());
        state.completed_at = Some(Utc::now());

        self.store.put(&state, self.settings.state_ttl_ms()).await?;
        self.audit.record(&SagaOutcome::from_state(&state)).await?;

        get_metrics().record_saga_recovered(&state.op_type);
        info!(saga_id = %state.saga_id, "stuck saga recovered and compensated");
        Ok(())
    }

    async fn apply_compensation(&self, record: &CompensationRecord) -> Result<()> {
        match record {
            CompensationRecord::ReverseTransaction { tx_id } => {
                match self.ledger.reverse(*tx_id, Some("saga recovery"), "recovery").await {
                    Ok(_) => Ok(()),
                    // Forward effect absent: nothing to reverse.
                    Err(AppError::NotFound(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            CompensationRecord::CancelTransfer { transfer_id } => {
                self.transfers.cancel_if_open(*transfer_id).await?;
                Ok(())
            }
            CompensationRecord::ResyncWallets {
                tenant_id,
                user_ids,
                currency,
            } => {
                for user_id in user_ids {
                    self.wallets
                        .sync_from_ledger(
                            tenant_id,
                            user_id,
                            currency,
                            crate::models::Wallet::DEFAULT_CATEGORY,
                        )
                        .await?;
                }
                Ok(())
            }
        }
    }
}
