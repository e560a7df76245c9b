use crate::models::{Account, LedgerEntry, LedgerTransaction, Transfer, Wallet};
use crate::services::{BalanceView, OperationResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::requests::FieldError;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Result of a money operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub transfer: Option<Transfer>,
    pub debit_tx: Option<LedgerTransaction>,
    pub credit_tx: Option<LedgerTransaction>,
    pub fee_tx: Option<LedgerTransaction>,
    pub saga_id: Uuid,
    pub replayed: bool,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
}

impl From<OperationResult> for OperationResponse {
    fn from(result: OperationResult) -> Self {
        Self {
            success: result.success,
            transfer: result.transfer,
            debit_tx: result.debit_tx,
            credit_tx: result.credit_tx,
            fee_tx: result.fee_tx,
            saga_id: result.saga_id,
            replayed: result.replayed,
            errors: result.errors,
            execution_time_ms: result.execution_time_ms,
        }
    }
}

/// Projected wallet balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalanceResponse {
    pub tenant_id: String,
    pub user_id: String,
    pub currency: String,
    pub category: String,
    pub balance: i64,
    pub bonus_balance: i64,
    pub locked_balance: i64,
    pub available_balance: i64,
    pub lifetime_deposits: i64,
    pub lifetime_withdrawals: i64,
    pub lifetime_fees: i64,
}

impl From<Wallet> for WalletBalanceResponse {
    fn from(wallet: Wallet) -> Self {
        let available_balance = wallet.available_balance();
        Self {
            tenant_id: wallet.tenant_id,
            user_id: wallet.user_id,
            currency: wallet.currency,
            category: wallet.category,
            balance: wallet.balance,
            bonus_balance: wallet.bonus_balance,
            locked_balance: wallet.locked_balance,
            available_balance,
            lifetime_deposits: wallet.lifetime_deposits,
            lifetime_withdrawals: wallet.lifetime_withdrawals,
            lifetime_fees: wallet.lifetime_fees,
        }
    }
}

/// Authoritative account balance from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalanceResponse {
    pub account_id: Uuid,
    pub balance: i64,
    pub available_balance: i64,
}

impl AccountBalanceResponse {
    pub fn new(account_id: Uuid, view: BalanceView) -> Self {
        Self {
            account_id,
            balance: view.balance,
            available_balance: view.available_balance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub account: Account,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self { account }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntriesResponse {
    pub entries: Vec<LedgerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success(42);
        assert!(response.success);
        assert_eq!(response.data, Some(42));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_error() {
        let response = ApiResponse::<()>::error(ErrorResponse::new("NOT_FOUND", "missing"));
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.error.unwrap().code, "NOT_FOUND");
    }

    #[test]
    fn test_wallet_response_computes_available() {
        let mut wallet = Wallet::new("t1", "u1", "EUR", "main");
        wallet.balance = 1_000;
        wallet.locked_balance = 250;
        let response = WalletBalanceResponse::from(wallet);
        assert_eq!(response.available_balance, 750);
    }
}
