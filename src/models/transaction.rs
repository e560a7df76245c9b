use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Closed set of ledger transaction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_tx_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerTransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Fee,
    Conversion,
    Bet,
    Win,
    Refund,
}

impl LedgerTransactionType {
    pub const ALL: [LedgerTransactionType; 8] = [
        LedgerTransactionType::Deposit,
        LedgerTransactionType::Withdrawal,
        LedgerTransactionType::Transfer,
        LedgerTransactionType::Fee,
        LedgerTransactionType::Conversion,
        LedgerTransactionType::Bet,
        LedgerTransactionType::Win,
        LedgerTransactionType::Refund,
    ];

    /// Event topic segment, e.g. `ledger.deposit.completed`.
    pub fn topic_segment(&self) -> &'static str {
        match self {
            LedgerTransactionType::Deposit => "deposit",
            LedgerTransactionType::Withdrawal => "withdrawal",
            LedgerTransactionType::Transfer => "transfer",
            LedgerTransactionType::Fee => "fee",
            LedgerTransactionType::Conversion => "conversion",
            LedgerTransactionType::Bet => "bet",
            LedgerTransactionType::Win => "win",
            LedgerTransactionType::Refund => "refund",
        }
    }
}

/// Role of a transaction under one external reference. The idempotency key
/// is `(tenant, external_ref, charge_role)`: a conversion pair shares its
/// reference across the Principal and Conversion legs, and a fee transaction
/// reuses the operation's reference under the Fee role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "charge_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeRole {
    Principal,
    Conversion,
    Fee,
}

/// Lifecycle of a posted transaction. Records are immutable; a reversal is a
/// new transaction pointing back via `parent_tx_id`, after which the original
/// is flagged Reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_tx_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Posted,
    Reversed,
}

impl TransactionStatus {
    pub fn can_be_reversed(&self) -> bool {
        matches!(self, TransactionStatus::Posted)
    }
}

/// An immutable double-entry ledger transaction. Exactly two entries exist
/// per transaction; both accounts share the transaction's currency.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub tenant_id: String,
    #[sqlx(rename = "type")]
    pub tx_type: LedgerTransactionType,
    pub charge_role: ChargeRole,
    pub status: TransactionStatus,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    /// Minor units, strictly positive.
    pub amount: i64,
    pub currency: String,
    pub external_ref: String,
    pub parent_tx_id: Option<Uuid>,
    /// Present on conversion-pair legs only.
    pub exchange_rate: Option<Decimal>,
    pub initiated_by: String,
    pub metadata: Option<serde_json::Value>,
    /// Per-tenant monotonic sequence; the canonical replay order.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// The deterministic external reference of this transaction's reversal.
    /// Deterministic refs make reversal idempotent through the ordinary
    /// replay path.
    pub fn reversal_ref(&self) -> String {
        format!("rev:{}", self.id)
    }

    /// True when the payload tuple matches a replayed request. Used to
    /// distinguish an idempotent replay from a conflicting one.
    pub fn matches_payload(
        &self,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: i64,
        currency: &str,
        tx_type: LedgerTransactionType,
    ) -> bool {
        self.from_account_id == from_account_id
            && self.to_account_id == to_account_id
            && self.amount == amount
            && self.currency == currency
            && self.tx_type == tx_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> LedgerTransaction {
        LedgerTransaction {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            tx_type: LedgerTransactionType::Deposit,
            charge_role: ChargeRole::Principal,
            status: TransactionStatus::Posted,
            from_account_id: Uuid::new_v4(),
            to_account_id: Uuid::new_v4(),
            amount: 97_100,
            currency: "EUR".to_string(),
            external_ref: "ext-1".to_string(),
            parent_tx_id: None,
            exchange_rate: None,
            initiated_by: "api".to_string(),
            metadata: None,
            sequence: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reversal_ref_is_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.reversal_ref(), tx.reversal_ref());
        assert!(tx.reversal_ref().starts_with("rev:"));
    }

    #[test]
    fn test_matches_payload() {
        let tx = sample_tx();
        assert!(tx.matches_payload(
            tx.from_account_id,
            tx.to_account_id,
            97_100,
            "EUR",
            LedgerTransactionType::Deposit,
        ));
        assert!(!tx.matches_payload(
            tx.from_account_id,
            tx.to_account_id,
            97_101,
            "EUR",
            LedgerTransactionType::Deposit,
        ));
        assert!(!tx.matches_payload(
            tx.from_account_id,
            tx.to_account_id,
            97_100,
            "USD",
            LedgerTransactionType::Deposit,
        ));
    }

    #[test]
    fn test_only_posted_can_be_reversed() {
        assert!(TransactionStatus::Posted.can_be_reversed());
        assert!(!TransactionStatus::Reversed.can_be_reversed());
    }

    #[test]
    fn test_topic_segments() {
        assert_eq!(LedgerTransactionType::Deposit.topic_segment(), "deposit");
        assert_eq!(LedgerTransactionType::Refund.topic_segment(), "refund");
    }
}
