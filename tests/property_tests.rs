//! Property-based checks of the posting invariants over random operation
//! histories, driven against the pure posting planner and an in-memory
//! apply loop.

use ledger_engine::error::AppError;
use ledger_engine::idempotency::{KeyGenerator, OperationFingerprint};
use ledger_engine::models::{Account, AccountPolicy, AccountSubtype, TransferStateMachine, TransferStatus};
use ledger_engine::services::{FeePolicy, PostingPlan};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;

const MAX_ACCOUNTS: usize = 8;
const MAX_AMOUNT: i64 = 1_000_000;

#[derive(Debug, Clone)]
struct PostOp {
    from: usize,
    to: usize,
    amount: i64,
}

fn post_op_strategy() -> impl Strategy<Value = PostOp> {
    (0..MAX_ACCOUNTS, 0..MAX_ACCOUNTS, 1..=MAX_AMOUNT).prop_map(|(from, to, amount)| PostOp {
        from,
        to,
        amount,
    })
}

/// A bank of accounts with mixed currencies and overdraft policies.
fn build_accounts() -> Vec<Account> {
    (0..MAX_ACCOUNTS)
        .map(|i| {
            let currency = if i % 3 == 0 { "USD" } else { "EUR" };
            let policy = match i % 4 {
                0 => AccountPolicy::negative_allowed(),
                1 => AccountPolicy::with_credit_limit(50_000),
                _ => AccountPolicy::strict(),
            };
            Account::new("prop", format!("user-{}", i), AccountSubtype::Main, currency, policy)
        })
        .collect()
}

proptest! {
    /// Invariants 1-3 and 5: every account balance equals its signed entry
    /// sum, every applied plan moves equal debit and credit amounts, floors
    /// hold after every entry, and only same-currency plans apply.
    #[test]
    fn prop_posting_history_preserves_invariants(
        ops in prop::collection::vec(post_op_strategy(), 1..200)
    ) {
        let mut accounts = build_accounts();
        // Signed entry sums per account index.
        let mut entry_sums: HashMap<usize, i64> = HashMap::new();

        for op in ops {
            if op.from == op.to {
                continue;
            }
            let (from, to) = (accounts[op.from].clone(), accounts[op.to].clone());

            match PostingPlan::compute(&from, &to, op.amount, &from.currency.clone()) {
                Ok(plan) => {
                    // Debit equals credit.
                    prop_assert_eq!(from.balance - plan.new_from, op.amount);
                    prop_assert_eq!(plan.new_to - to.balance, op.amount);
                    // Currency equality held.
                    prop_assert_eq!(&from.currency, &to.currency);
                    // Floors hold after the entry.
                    prop_assert!(from.permits_balance(plan.new_from));

                    accounts[op.from].balance = plan.new_from;
                    accounts[op.to].balance = plan.new_to;
                    *entry_sums.entry(op.from).or_insert(0) -= op.amount;
                    *entry_sums.entry(op.to).or_insert(0) += op.amount;
                }
                Err(
                    AppError::InsufficientFunds { .. }
                    | AppError::CreditLimitExceeded { .. }
                    | AppError::MismatchedCurrency { .. },
                ) => {
                    // Rejected: nothing moves.
                }
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
            }
        }

        // Balance equals the signed sum of all applied entries.
        for (index, account) in accounts.iter().enumerate() {
            prop_assert_eq!(account.balance, entry_sums.get(&index).copied().unwrap_or(0));
        }

        // Conservation: applied entries always moved money between accounts,
        // never created it.
        let total: i64 = accounts.iter().map(|a| a.balance).sum();
        prop_assert_eq!(total, 0);
    }

    /// Strict accounts never observe a negative balance in any history.
    #[test]
    fn prop_strict_accounts_never_go_negative(
        ops in prop::collection::vec(post_op_strategy(), 1..200)
    ) {
        let mut accounts = build_accounts();
        for op in ops {
            if op.from == op.to {
                continue;
            }
            let (from, to) = (accounts[op.from].clone(), accounts[op.to].clone());
            if let Ok(plan) = PostingPlan::compute(&from, &to, op.amount, &from.currency.clone()) {
                accounts[op.from].balance = plan.new_from;
                accounts[op.to].balance = plan.new_to;
            }
            for account in &accounts {
                if !account.allow_negative {
                    prop_assert!(account.balance >= 0);
                }
                if let Some(limit) = account.credit_limit {
                    if account.allow_negative {
                        prop_assert!(account.balance >= -limit);
                    }
                }
            }
        }
    }

    /// Fee bounds: 0 <= fee < amount for any percent the config can carry.
    #[test]
    fn prop_fee_is_bounded(
        amount in 1..=MAX_AMOUNT,
        percent in 0u32..=10_000,
    ) {
        let policy = FeePolicy::new(Decimal::from(percent) / Decimal::from(100), HashMap::new());
        let fee = policy.compute(amount, None);
        prop_assert!(fee >= 0);
        prop_assert!(fee < amount);
    }

    /// Derived references are deterministic inside a window and unique
    /// across amounts.
    #[test]
    fn prop_derived_keys_deterministic(
        amount in 1..=MAX_AMOUNT,
        window_ms in 60_000u64..=300_000,
    ) {
        let generator = KeyGenerator::new(window_ms);
        let at = chrono::DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let fingerprint = OperationFingerprint {
            tenant_id: "t1".to_string(),
            op_type: "deposit".to_string(),
            from_user_id: "a".to_string(),
            to_user_id: "b".to_string(),
            amount,
            currency: "EUR".to_string(),
            method: None,
        };

        prop_assert_eq!(generator.derive_at(&fingerprint, at), generator.derive_at(&fingerprint, at));

        let mut other = fingerprint.clone();
        other.amount = amount + 1;
        prop_assert_ne!(generator.derive_at(&fingerprint, at), generator.derive_at(&other, at));
    }

    /// Transfer transitions never leave the terminal set.
    #[test]
    fn prop_transfer_terminal_states_are_absorbing(
        steps in prop::collection::vec(0usize..5, 1..20)
    ) {
        let all = [
            TransferStatus::Pending,
            TransferStatus::Active,
            TransferStatus::Completed,
            TransferStatus::Failed,
            TransferStatus::Cancelled,
        ];
        let mut current = TransferStatus::Pending;
        for step in steps {
            let candidate = all[step];
            if TransferStateMachine::can_transition(current, candidate) {
                current = candidate;
            }
            if current.is_terminal() {
                // No candidate may leave a terminal state.
                for next in all {
                    prop_assert!(!TransferStateMachine::can_transition(current, next));
                }
            }
        }
    }
}
