use crate::config::SagaSettings;
use crate::error::{AppError, Result};
use crate::models::{CompensationRecord, SagaOutcome, SagaState, SagaStatus, StepRecord, StepStatus};
use crate::observability::get_metrics;
use crate::repositories::SagaAuditRepository;
use crate::saga::heartbeat::HeartbeatStore;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One step of a saga. Critical steps abort the saga on failure and trigger
/// compensation of everything executed before them; non-critical steps only
/// log their failures.
#[async_trait]
pub trait SagaStep<C: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    fn critical(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut C) -> Result<()>;

    /// Undoes the step's forward effect, best-effort. Must be idempotent:
    /// recovery may re-run it after a partial rollback.
    async fn compensate(&self, _ctx: &mut C) -> Result<()> {
        Ok(())
    }
}

/// Context contract: after every step the coordinator persists the
/// accumulated compensation records so recovery can roll back a dead saga
/// without the step objects.
pub trait CompensationLog {
    fn compensations(&self) -> Vec<CompensationRecord>;
}

/// Per-run options. The cancel flag is polled between steps, never
/// mid-step.
#[derive(Clone, Default)]
pub struct SagaOptions {
    pub cancel: Option<Arc<AtomicBool>>,
    /// Pre-allocated saga id, letting callers reference the saga from rows
    /// written inside steps.
    pub saga_id: Option<Uuid>,
}

/// Outcome of a saga run.
#[derive(Debug)]
pub struct SagaReport {
    pub saga_id: Uuid,
    pub status: SagaStatus,
    pub error: Option<AppError>,
    pub duration_ms: u64,
}

impl SagaReport {
    pub fn success(&self) -> bool {
        self.status == SagaStatus::Completed
    }
}

/// Drives a saga: state in the heartbeat store before the first step, a
/// heartbeat task while running, bounded per-step retries for transient
/// faults, reverse-order compensation on critical failure, and a durable
/// audit row for every terminal outcome.
pub struct SagaCoordinator {
    store: Arc<dyn HeartbeatStore>,
    audit: SagaAuditRepository,
    settings: SagaSettings,
}

impl SagaCoordinator {
    pub fn new(store: Arc<dyn HeartbeatStore>, pool: PgPool, settings: SagaSettings) -> Self {
        Self {
            store,
            audit: SagaAuditRepository::new(pool),
            settings,
        }
    }

    pub fn settings(&self) -> &SagaSettings {
        &self.settings
    }

    pub async fn run<C>(
        &self,
        op_type: &str,
        steps: Vec<Box<dyn SagaStep<C>>>,
        ctx: &mut C,
        options: SagaOptions,
    ) -> Result<SagaReport>
    where
        C: Send + CompensationLog,
    {
        let saga_id = options.saga_id.unwrap_or_else(Uuid::new_v4);
        let started = Instant::now();
        let ttl_ms = self.settings.state_ttl_ms();
        let deadline = started + Duration::from_millis(self.settings.operation_timeout_ms);

        let records: Vec<StepRecord> = steps
            .iter()
            .map(|s| StepRecord::pending(s.name(), s.critical()))
            .collect();

        let state = Arc::new(Mutex::new(SagaState::new(saga_id, op_type, records)));
        self.store.put(&*state.lock().await, ttl_ms).await?;

        let heartbeat = self.spawn_heartbeat(state.clone(), ttl_ms);

        let mut failure: Option<(usize, AppError)> = None;
        let mut executed: Vec<usize> = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            // Cancellation and the soft deadline are polled between steps;
            // a running step always finishes.
            if Instant::now() > deadline {
                warn!(saga_id = %saga_id, step = step.name(), "saga deadline expired, skipping remaining steps");
                failure = Some((
                    index,
                    AppError::SagaFailed {
                        saga_id: saga_id.to_string(),
                        cause: "operation deadline exceeded".to_string(),
                    },
                ));
                self.mark_remaining_skipped(&state, index).await;
                break;
            }
            if let Some(cancel) = &options.cancel {
                if cancel.load(Ordering::SeqCst) {
                    info!(saga_id = %saga_id, step = step.name(), "saga cancelled by caller");
                    failure = Some((
                        index,
                        AppError::SagaFailed {
                            saga_id: saga_id.to_string(),
                            cause: "cancelled".to_string(),
                        },
                    ));
                    self.mark_remaining_skipped(&state, index).await;
                    break;
                }
            }

            {
                let mut s = state.lock().await;
                s.status = SagaStatus::InProgress;
                s.current_step = index;
                s.steps[index].status = StepStatus::Running;
                // After the initial write, state persistence is best-effort:
                // aborting a saga mid-flight because the heartbeat store
                // hiccuped would strand committed forward effects without
                // compensation.
                self.persist_state(&s, ttl_ms).await;
            }

            match self.execute_with_retry(step.as_ref(), ctx).await {
                Ok(()) => {
                    executed.push(index);
                    let mut s = state.lock().await;
                    s.steps[index].status = StepStatus::Done;
                    s.compensations = ctx.compensations();
                    self.persist_state(&s, ttl_ms).await;
                }
                Err(e) if !step.critical() => {
                    warn!(saga_id = %saga_id, step = step.name(), error = %e, "non-critical step failed, continuing");
                    let mut s = state.lock().await;
                    s.steps[index].status = StepStatus::Failed;
                    self.persist_state(&s, ttl_ms).await;
                }
                Err(e) => {
                    warn!(saga_id = %saga_id, step = step.name(), error = %e, "critical step failed, compensating");
                    {
                        let mut s = state.lock().await;
                        s.steps[index].status = StepStatus::Failed;
                        self.persist_state(&s, ttl_ms).await;
                    }
                    failure = Some((index, e));
                    break;
                }
            }
        }

        heartbeat.abort();

        let status = match failure.as_ref() {
            None => SagaStatus::Completed,
            Some(_) => {
                let clean = self.compensate(&steps, &executed, ctx, &state, ttl_ms).await;
                if clean {
                    SagaStatus::Compensated
                } else {
                    SagaStatus::Failed
                }
            }
        };

        let error = failure.map(|(_, e)| e);
        {
            let mut s = state.lock().await;
            s.status = status;
            s.completed_at = Some(chrono::Utc::now());
            s.error = error.as_ref().map(|e| e.to_string());
            if let Err(e) = self.store.put(&s, ttl_ms).await {
                warn!(saga_id = %saga_id, error = %e, "failed to persist terminal saga state");
            }
            if let Err(e) = self.audit.record(&SagaOutcome::from_state(&s)).await {
                warn!(saga_id = %saga_id, error = %e, "failed to write saga audit row");
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        get_metrics().record_saga(op_type, status.as_str(), duration_ms as f64);
        info!(
            saga_id = %saga_id,
            op_type = %op_type,
            status = status.as_str(),
            duration_ms = duration_ms,
            "saga finished"
        );

        Ok(SagaReport {
            saga_id,
            status,
            error,
            duration_ms,
        })
    }

    /// Bounded retries for transient faults on critical steps. Business
    /// rejections surface immediately.
    async fn execute_with_retry<C: Send>(
        &self,
        step: &dyn SagaStep<C>,
        ctx: &mut C,
    ) -> Result<()> {
        let max_attempts = if step.critical() {
            self.settings.max_retries.max(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match step.execute(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(step = step.name(), attempt = attempt, error = %e, "transient step failure, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs compensation of executed steps in reverse order, best-effort.
    /// Returns true when every compensator succeeded.
    async fn compensate<C>(
        &self,
        steps: &[Box<dyn SagaStep<C>>],
        executed: &[usize],
        ctx: &mut C,
        state: &Arc<Mutex<SagaState>>,
        ttl_ms: u64,
    ) -> bool
    where
        C: Send + CompensationLog,
    {
        let mut clean = true;
        for &index in executed.iter().rev() {
            let step = &steps[index];
            match step.compensate(ctx).await {
                Ok(()) => {
                    let mut s = state.lock().await;
                    s.steps[index].status = StepStatus::Compensated;
                    s.compensations = ctx.compensations();
                    if let Err(e) = self.store.put(&s, ttl_ms).await {
                        warn!(step = step.name(), error = %e, "failed to persist compensation progress");
                    }
                }
                Err(e) => {
                    error!(step = step.name(), error = %e, "compensation failed");
                    clean = false;
                }
            }
        }
        clean
    }

    async fn persist_state(&self, state: &SagaState, ttl_ms: u64) {
        if let Err(e) = self.store.put(state, ttl_ms).await {
            warn!(saga_id = %state.saga_id, error = %e, "failed to persist saga state");
        }
    }

    async fn mark_remaining_skipped(&self, state: &Arc<Mutex<SagaState>>, from_index: usize) {
        let mut s = state.lock().await;
        for record in s.steps.iter_mut().skip(from_index) {
            if record.status == StepStatus::Pending {
                record.status = StepStatus::Skipped;
            }
        }
    }

    fn spawn_heartbeat(
        &self,
        state: Arc<Mutex<SagaState>>,
        ttl_ms: u64,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = Duration::from_millis(self.settings.heartbeat_interval_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the initial put already
            // stamped the heartbeat.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let s = state.lock().await;
                if s.status.is_terminal() {
                    break;
                }
                if let Err(e) = store.put(&s, ttl_ms).await {
                    warn!(saga_id = %s.saga_id, error = %e, "heartbeat write failed");
                }
            }
        })
    }
}
