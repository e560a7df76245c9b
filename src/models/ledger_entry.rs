use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Direction of a ledger entry. Within a transaction the debit entry is
/// written before the credit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_direction", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    pub fn opposite(&self) -> Self {
        match self {
            EntryDirection::Debit => EntryDirection::Credit,
            EntryDirection::Credit => EntryDirection::Debit,
        }
    }

    /// Effect on the account balance: a debit removes funds, a credit adds.
    pub fn sign(&self) -> i64 {
        match self {
            EntryDirection::Debit => -1,
            EntryDirection::Credit => 1,
        }
    }
}

/// One side of a double-entry transaction. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub direction: EntryDirection,
    /// Minor units, always positive; the direction carries the sign.
    pub amount: i64,
    pub currency: String,
    /// The account balance immediately after this entry, under the serial
    /// order given by `sequence`.
    pub balance_after: i64,
    /// Copied from the owning transaction; orders entries per account.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn debit(
        transaction_id: Uuid,
        account_id: Uuid,
        amount: i64,
        currency: impl Into<String>,
        balance_after: i64,
        sequence: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            account_id,
            direction: EntryDirection::Debit,
            amount,
            currency: currency.into(),
            balance_after,
            sequence,
            created_at: Utc::now(),
        }
    }

    pub fn credit(
        transaction_id: Uuid,
        account_id: Uuid,
        amount: i64,
        currency: impl Into<String>,
        balance_after: i64,
        sequence: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            account_id,
            direction: EntryDirection::Credit,
            amount,
            currency: currency.into(),
            balance_after,
            sequence,
            created_at: Utc::now(),
        }
    }

    /// Positive for credits, negative for debits.
    pub fn signed_amount(&self) -> i64 {
        self.direction.sign() * self.amount
    }
}

/// The debit/credit pair produced by one transaction. Construction checks
/// the balanced-amount invariant.
#[derive(Debug, Clone)]
pub struct EntryPair {
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

impl EntryPair {
    pub fn new(debit: LedgerEntry, credit: LedgerEntry) -> Result<Self, UnbalancedEntryError> {
        if debit.direction != EntryDirection::Debit || credit.direction != EntryDirection::Credit {
            return Err(UnbalancedEntryError::WrongDirection);
        }
        if debit.amount != credit.amount {
            return Err(UnbalancedEntryError::AmountMismatch {
                debit: debit.amount,
                credit: credit.amount,
            });
        }
        if debit.currency != credit.currency {
            return Err(UnbalancedEntryError::CurrencyMismatch);
        }
        Ok(Self { debit, credit })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbalancedEntryError {
    WrongDirection,
    AmountMismatch { debit: i64, credit: i64 },
    CurrencyMismatch,
}

impl std::fmt::Display for UnbalancedEntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnbalancedEntryError::WrongDirection => write!(f, "entry pair has wrong directions"),
            UnbalancedEntryError::AmountMismatch { debit, credit } => {
                write!(f, "entry amounts differ: debit {}, credit {}", debit, credit)
            }
            UnbalancedEntryError::CurrencyMismatch => write!(f, "entry currencies differ"),
        }
    }
}

impl std::error::Error for UnbalancedEntryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sign() {
        assert_eq!(EntryDirection::Debit.sign(), -1);
        assert_eq!(EntryDirection::Credit.sign(), 1);
        assert_eq!(EntryDirection::Debit.opposite(), EntryDirection::Credit);
    }

    #[test]
    fn test_signed_amount() {
        let tx = Uuid::new_v4();
        let debit = LedgerEntry::debit(tx, Uuid::new_v4(), 500, "EUR", -500, 7);
        let credit = LedgerEntry::credit(tx, Uuid::new_v4(), 500, "EUR", 500, 7);
        assert_eq!(debit.signed_amount(), -500);
        assert_eq!(credit.signed_amount(), 500);
    }

    #[test]
    fn test_balanced_pair_accepted() {
        let tx = Uuid::new_v4();
        let debit = LedgerEntry::debit(tx, Uuid::new_v4(), 100, "EUR", -100, 1);
        let credit = LedgerEntry::credit(tx, Uuid::new_v4(), 100, "EUR", 100, 1);
        assert!(EntryPair::new(debit, credit).is_ok());
    }

    #[test]
    fn test_unbalanced_pair_rejected() {
        let tx = Uuid::new_v4();
        let debit = LedgerEntry::debit(tx, Uuid::new_v4(), 100, "EUR", -100, 1);
        let credit = LedgerEntry::credit(tx, Uuid::new_v4(), 99, "EUR", 99, 1);
        assert_eq!(
            EntryPair::new(debit, credit).unwrap_err(),
            UnbalancedEntryError::AmountMismatch { debit: 100, credit: 99 }
        );
    }

    #[test]
    fn test_mixed_currency_pair_rejected() {
        let tx = Uuid::new_v4();
        let debit = LedgerEntry::debit(tx, Uuid::new_v4(), 100, "EUR", -100, 1);
        let credit = LedgerEntry::credit(tx, Uuid::new_v4(), 100, "USD", 100, 1);
        assert_eq!(
            EntryPair::new(debit, credit).unwrap_err(),
            UnbalancedEntryError::CurrencyMismatch
        );
    }
}
