use crate::models::Metadata;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single request-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Body of the deposit/withdrawal/transfer endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOperationRequest {
    pub tenant_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub destination_currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub method: Option<String>,
    pub external_ref: Option<String>,
    pub metadata: Option<Metadata>,
}

impl CreateOperationRequest {
    /// Field-level checks producing API error details; the operation layer
    /// re-validates semantically before any I/O.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.tenant_id.trim().is_empty() {
            errors.push(FieldError::new("tenant_id", "tenant_id is required"));
        }
        if self.from_user_id.trim().is_empty() {
            errors.push(FieldError::new("from_user_id", "from_user_id is required"));
        }
        if self.to_user_id.trim().is_empty() {
            errors.push(FieldError::new("to_user_id", "to_user_id is required"));
        }
        if self.amount <= 0 {
            errors.push(FieldError::new("amount", "amount must be positive"));
        }
        if self.currency.trim().is_empty() {
            errors.push(FieldError::new("currency", "currency is required"));
        }
        if let Some(ref external_ref) = self.external_ref {
            if external_ref.is_empty() || external_ref.len() > 128 {
                errors.push(FieldError::new(
                    "external_ref",
                    "external_ref must be between 1 and 128 chars",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One key of a bulk wallet-balance lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkBalanceKey {
    pub user_id: String,
    pub currency: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    crate::models::Wallet::DEFAULT_CATEGORY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkBalancesRequest {
    pub tenant_id: String,
    pub keys: Vec<BulkBalanceKey>,
}

impl BulkBalancesRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.tenant_id.trim().is_empty() {
            errors.push(FieldError::new("tenant_id", "tenant_id is required"));
        }
        if self.keys.is_empty() {
            errors.push(FieldError::new("keys", "at least one key is required"));
        }
        if self.keys.len() > 100 {
            errors.push(FieldError::new("keys", "at most 100 keys per request"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Query of the wallet balance endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalanceQuery {
    pub currency: String,
    #[serde(default = "default_category")]
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseTransactionRequest {
    pub reason: Option<String>,
    #[serde(default = "default_initiator")]
    pub initiated_by: String,
}

fn default_initiator() -> String {
    "admin".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTransactionsQuery {
    pub tenant_id: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateOperationRequest {
        CreateOperationRequest {
            tenant_id: "t1".to_string(),
            from_user_id: "sys".to_string(),
            to_user_id: "u1".to_string(),
            amount: 100_000,
            currency: "EUR".to_string(),
            destination_currency: None,
            exchange_rate: None,
            method: Some("card".to_string()),
            external_ref: None,
            metadata: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut r = request();
        r.tenant_id = "".to_string();
        r.amount = -5;
        let errors = r.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field == "tenant_id"));
        assert!(errors.iter().any(|e| e.field == "amount"));
    }

    #[test]
    fn test_external_ref_length_check() {
        let mut r = request();
        r.external_ref = Some("y".repeat(200));
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_bulk_request_limits() {
        let empty = BulkBalancesRequest {
            tenant_id: "t1".to_string(),
            keys: vec![],
        };
        assert!(empty.validate().is_err());
    }
}
