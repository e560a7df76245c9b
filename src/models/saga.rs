use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Saga lifecycle. Non-terminal states carry a TTL in the heartbeat store
/// and are subject to recovery once the heartbeat goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Recovered,
    Compensated,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Recovered | SagaStatus::Compensated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::InProgress => "in_progress",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Recovered => "recovered",
            SagaStatus::Compensated => "compensated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
    Compensated,
}

/// Per-step record inside the persisted saga state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub critical: bool,
    pub status: StepStatus,
}

impl StepRecord {
    pub fn pending(name: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            critical,
            status: StepStatus::Pending,
        }
    }
}

/// Serializable undo instruction. Steps append these as their forward
/// effects land, so recovery can compensate a dead saga from persisted state
/// alone. Every record is idempotent to apply: reversal goes through the
/// ledger's replay path and transfer cancellation checks the current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompensationRecord {
    ReverseTransaction { tx_id: Uuid },
    CancelTransfer { transfer_id: Uuid },
    ResyncWallets {
        tenant_id: String,
        user_ids: Vec<String>,
        currency: String,
    },
}

/// In-flight saga state held in the heartbeat store under `saga:{saga_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    pub saga_id: Uuid,
    pub op_type: String,
    pub status: SagaStatus,
    pub steps: Vec<StepRecord>,
    pub current_step: usize,
    pub compensations: Vec<CompensationRecord>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SagaState {
    pub fn new(saga_id: Uuid, op_type: impl Into<String>, steps: Vec<StepRecord>) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            op_type: op_type.into(),
            status: SagaStatus::Pending,
            steps,
            current_step: 0,
            compensations: Vec::new(),
            started_at: now,
            last_heartbeat: now,
            completed_at: None,
            error: None,
        }
    }

    /// Age of the last heartbeat, saturating at zero for clock skew.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.last_heartbeat).max(chrono::Duration::zero())
    }

    /// A non-terminal saga whose heartbeat is older than the stuck threshold.
    pub fn is_stuck(&self, now: DateTime<Utc>, stuck_threshold_ms: u64) -> bool {
        !self.status.is_terminal()
            && self.heartbeat_age(now) > chrono::Duration::milliseconds(stuck_threshold_ms as i64)
    }
}

/// Durable audit row written for every terminal saga outcome. The Redis copy
/// expires; this table does not.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SagaOutcome {
    pub saga_id: Uuid,
    pub op_type: String,
    pub status: String,
    pub error: Option<String>,
    pub steps: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SagaOutcome {
    pub fn from_state(state: &SagaState) -> Self {
        Self {
            saga_id: state.saga_id,
            op_type: state.op_type.clone(),
            status: state.status.as_str().to_string(),
            error: state.error.clone(),
            steps: serde_json::to_value(&state.steps).unwrap_or(serde_json::Value::Null),
            started_at: state.started_at,
            finished_at: state.completed_at.unwrap_or_else(Utc::now),
        }
    }
}
