use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account subtype within a user's set of accounts. One (tenant, user,
/// subtype, currency) tuple maps to exactly one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_subtype", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountSubtype {
    /// Primary spendable balance.
    Main,
    /// Promotional balance, kept apart from withdrawable funds.
    Bonus,
    /// Funds held against pending operations.
    Locked,
    /// Tenant-owned FX intermediate; carries pending conversion positions.
    Conversion,
    /// Tenant-owned fee collection account.
    Fee,
}

impl AccountSubtype {
    /// Subtypes owned by the tenant rather than an end user.
    pub fn is_tenant_owned(&self) -> bool {
        matches!(self, AccountSubtype::Conversion | AccountSubtype::Fee)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSubtype::Main => "main",
            AccountSubtype::Bonus => "bonus",
            AccountSubtype::Locked => "locked",
            AccountSubtype::Conversion => "conversion",
            AccountSubtype::Fee => "fee",
        }
    }
}

/// Operational state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Account accepts postings.
    Active,
    /// Suspended; all further posting is rejected. Accounts are never deleted.
    Closed,
}

impl AccountStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

/// Posting policy fixed at account creation. `allow_negative` never changes
/// implicitly; flipping it requires the explicit admin operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPolicy {
    pub allow_negative: bool,
    /// Maximum overdraft in minor units; only meaningful with
    /// `allow_negative = true`. The balance may not go below `-credit_limit`.
    pub credit_limit: Option<i64>,
}

impl AccountPolicy {
    pub fn strict() -> Self {
        Self {
            allow_negative: false,
            credit_limit: None,
        }
    }

    pub fn negative_allowed() -> Self {
        Self {
            allow_negative: true,
            credit_limit: None,
        }
    }

    pub fn with_credit_limit(limit: i64) -> Self {
        Self {
            allow_negative: true,
            credit_limit: Some(limit),
        }
    }
}

/// A ledger account. The balance column equals the signed sum of all posted
/// entries for the account; it is only ever mutated inside a posting
/// transaction, never written directly by any other component.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub subtype: AccountSubtype,
    pub currency: String,
    /// Minor units.
    pub balance: i64,
    pub allow_negative: bool,
    pub credit_limit: Option<i64>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        subtype: AccountSubtype,
        currency: impl Into<String>,
        policy: AccountPolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            subtype,
            currency: currency.into(),
            balance: 0,
            allow_negative: policy.allow_negative,
            credit_limit: policy.credit_limit,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_post(&self) -> bool {
        self.status.is_operational()
    }

    /// Lowest balance this account may reach: 0 without `allow_negative`,
    /// `-credit_limit` with a limit, unbounded otherwise.
    pub fn floor(&self) -> Option<i64> {
        if !self.allow_negative {
            Some(0)
        } else {
            self.credit_limit.map(|limit| -limit)
        }
    }

    /// Whether a debit landing the balance at `projected` is permitted.
    pub fn permits_balance(&self, projected: i64) -> bool {
        match self.floor() {
            Some(floor) => projected >= floor,
            None => true,
        }
    }
}
