use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Closed,
}

/// Read-optimized projection of a user's ledger balances for one
/// (tenant, user, currency, category) key.
///
/// Never authoritative: posting decisions always consult the ledger, and any
/// drift reconciles toward it via `sync_from_ledger`. The lifetime counters
/// are advisory and incremented by the operations layer only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub currency: String,
    pub category: String,
    /// Mirror of the Main account balance, minor units.
    pub balance: i64,
    /// Mirror of the Bonus account balance.
    pub bonus_balance: i64,
    /// Mirror of the Locked account balance.
    pub locked_balance: i64,
    pub allow_negative: bool,
    pub credit_limit: Option<i64>,
    pub lifetime_deposits: i64,
    pub lifetime_withdrawals: i64,
    pub lifetime_fees: i64,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub const DEFAULT_CATEGORY: &'static str = "main";

    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        currency: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            currency: currency.into(),
            category: category.into(),
            balance: 0,
            bonus_balance: 0,
            locked_balance: 0,
            allow_negative: false,
            credit_limit: None,
            lifetime_deposits: 0,
            lifetime_withdrawals: 0,
            lifetime_fees: 0,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Spendable projection value.
    pub fn available_balance(&self) -> i64 {
        self.balance - self.locked_balance
    }

    pub fn total_balance(&self) -> i64 {
        self.balance + self.bonus_balance + self.locked_balance
    }
}
