use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Transfer lifecycle. `Active` mirrors the in-progress saga; the terminal
/// set is {Completed, Failed, Cancelled} and transitions are monotonic: a
/// terminal transfer is never re-opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// State machine guarding transfer status transitions.
#[derive(Debug, Clone)]
pub struct TransferStateMachine;

impl TransferStateMachine {
    pub fn valid_transitions(current: TransferStatus) -> Vec<TransferStatus> {
        match current {
            TransferStatus::Pending => vec![TransferStatus::Active, TransferStatus::Cancelled],
            TransferStatus::Active => vec![
                TransferStatus::Completed,
                TransferStatus::Failed,
                TransferStatus::Cancelled,
            ],
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled => {
                vec![]
            }
        }
    }

    pub fn can_transition(from: TransferStatus, to: TransferStatus) -> bool {
        Self::valid_transitions(from).contains(&to)
    }
}

/// Aggregate linking one money operation to its ledger transactions. Exists
/// iff its ledger legs exist; `Completed` only once every leg is posted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: Uuid,
    pub tenant_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    /// Gross amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub fee_amount: i64,
    pub method: Option<String>,
    pub status: TransferStatus,
    pub debit_tx_id: Option<Uuid>,
    pub credit_tx_id: Option<Uuid>,
    pub fee_tx_id: Option<Uuid>,
    pub external_ref: String,
    pub saga_id: Option<Uuid>,
    /// Opaque to the ledger; payout details for withdrawals live here.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: impl Into<String>,
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        fee_amount: i64,
        external_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            amount,
            currency: currency.into(),
            fee_amount,
            method: None,
            status: TransferStatus::Pending,
            debit_tx_id: None,
            credit_tx_id: None,
            fee_tx_id: None,
            external_ref: external_ref.into(),
            saga_id: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_saga_id(mut self, saga_id: Uuid) -> Self {
        self.saga_id = Some(saga_id);
        self
    }

    /// Net amount credited to the destination.
    pub fn net_amount(&self) -> i64 {
        self.amount - self.fee_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_set() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Active.is_terminal());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(TransferStateMachine::can_transition(
            TransferStatus::Pending,
            TransferStatus::Active
        ));
        assert!(TransferStateMachine::can_transition(
            TransferStatus::Active,
            TransferStatus::Completed
        ));
        assert!(TransferStateMachine::can_transition(
            TransferStatus::Active,
            TransferStatus::Cancelled
        ));
        // No re-opening.
        assert!(!TransferStateMachine::can_transition(
            TransferStatus::Completed,
            TransferStatus::Active
        ));
        assert!(!TransferStateMachine::can_transition(
            TransferStatus::Cancelled,
            TransferStatus::Pending
        ));
        assert!(!TransferStateMachine::can_transition(
            TransferStatus::Failed,
            TransferStatus::Completed
        ));
    }

    #[test]
    fn test_net_amount() {
        let transfer = Transfer::new("t1", "u1", "u2", 100_000, "EUR", 2_900, "ext-1");
        assert_eq!(transfer.net_amount(), 97_100);
        assert_eq!(transfer.status, TransferStatus::Pending);
    }
}
