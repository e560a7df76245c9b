use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{LedgerTransaction, LedgerTransactionType};

/// Outbound topic names. Ledger topics are per transaction type
/// (`ledger.deposit.completed`, ...); wallet topics per operation.
pub mod topics {
    use crate::models::LedgerTransactionType;

    pub fn ledger_completed(tx_type: LedgerTransactionType) -> String {
        format!("ledger.{}.completed", tx_type.topic_segment())
    }

    pub fn wallet_completed(op: &str) -> String {
        format!("wallet.{}.completed", op)
    }
}

/// Envelope wrapping every outbound event with common metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<String>,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(topic: impl Into<String>, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            topic: topic.into(),
            timestamp: Utc::now(),
            source: "ledger-engine".to_string(),
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Payload of `ledger.{type}.completed`. Publication is fire-and-forget;
/// the wallet projection never depends on these alone and reconciles on
/// demand when one is missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCompletedEvent {
    pub tx_id: Uuid,
    pub tenant_id: String,
    pub tx_type: LedgerTransactionType,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
}

impl LedgerCompletedEvent {
    pub fn from_transaction(tx: &LedgerTransaction) -> Self {
        Self {
            tx_id: tx.id,
            tenant_id: tx.tenant_id.clone(),
            tx_type: tx.tx_type,
            from_account_id: tx.from_account_id,
            to_account_id: tx.to_account_id,
            amount: tx.amount,
            currency: tx.currency.clone(),
            sequence: tx.sequence,
            timestamp: tx.created_at,
        }
    }

    pub fn topic(&self) -> String {
        topics::ledger_completed(self.tx_type)
    }
}

/// Payload of `wallet.{op}.completed`, emitted by the operations layer after
/// a money operation finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletOpEvent {
    pub tenant_id: String,
    pub user_id: String,
    pub currency: String,
    pub amount: i64,
    pub transfer_id: Uuid,
    pub tx_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_topic_names() {
        assert_eq!(
            topics::ledger_completed(LedgerTransactionType::Deposit),
            "ledger.deposit.completed"
        );
        assert_eq!(
            topics::ledger_completed(LedgerTransactionType::Refund),
            "ledger.refund.completed"
        );
        assert_eq!(topics::wallet_completed("deposit"), "wallet.deposit.completed");
    }

    #[test]
    fn test_envelope_serialization() {
        let payload = WalletOpEvent {
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            currency: "EUR".to_string(),
            amount: 97_100,
            transfer_id: Uuid::new_v4(),
            tx_id: None,
            timestamp: Utc::now(),
        };
        let envelope =
            EventEnvelope::new(topics::wallet_completed("deposit"), payload).with_correlation_id("corr-1");

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("wallet.deposit.completed"));
        assert!(json.contains("ledger-engine"));
        assert!(json.contains("corr-1"));
    }
}
