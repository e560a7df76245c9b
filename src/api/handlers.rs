use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::api::requests::{
    BulkBalancesRequest, CreateOperationRequest, EntriesQuery, ListTransactionsQuery,
    ReverseTransactionRequest, WalletBalanceQuery,
};
use crate::api::responses::{
    AccountBalanceResponse, AccountResponse, ApiResponse, EntriesResponse, ErrorResponse,
    OperationResponse, WalletBalanceResponse,
};
use crate::error::AppError;
use crate::services::{OperationRequest, OperationResult, WalletKey};

use super::routes::AppState;

type HandlerError = (StatusCode, Json<ApiResponse<()>>);

fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::DuplicateOperation(_) | AppError::ConflictingReplay(_) => StatusCode::CONFLICT,
        AppError::InsufficientFunds { .. }
        | AppError::CreditLimitExceeded { .. }
        | AppError::MismatchedCurrency { .. }
        | AppError::AccountClosed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Database(_) | AppError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: &AppError) -> HandlerError {
    let status = status_for(error);
    if status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::SERVICE_UNAVAILABLE {
        tracing::error!(error = %error, "request failed");
        return (
            status,
            Json(ApiResponse::<()>::error(ErrorResponse::new(
                error.code(),
                "an internal error occurred",
            ))),
        );
    }
    (
        status,
        Json(ApiResponse::<()>::error(ErrorResponse::new(
            error.code(),
            error.to_string(),
        ))),
    )
}

fn reject_validation(details: Vec<crate::api::requests::FieldError>) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(
            ErrorResponse::new("VALIDATION_ERROR", "request validation failed").with_details(details),
        )),
    )
}

fn operation_request(body: CreateOperationRequest) -> OperationRequest {
    let mut request = OperationRequest::new(
        body.tenant_id,
        body.from_user_id,
        body.to_user_id,
        body.amount,
        body.currency,
    );
    if let (Some(dest), Some(rate)) = (body.destination_currency.clone(), body.exchange_rate) {
        request = request.with_conversion(dest, rate);
    }
    if let Some(method) = body.method {
        request = request.with_method(method);
    }
    if let Some(external_ref) = body.external_ref {
        request = request.with_external_ref(external_ref);
    }
    if let Some(metadata) = body.metadata {
        request = request.with_metadata(metadata);
    }
    request
}

fn operation_reply(
    result: crate::error::Result<OperationResult>,
) -> Result<(StatusCode, Json<ApiResponse<OperationResponse>>), HandlerError> {
    match result {
        Ok(result) if result.success => {
            let status = if result.replayed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            Ok((status, Json(ApiResponse::success(result.into()))))
        }
        Ok(result) => {
            let error = result
                .error
                .as_ref()
                .map(|e| (status_for(e), e.code().to_string(), e.to_string()))
                .unwrap_or_else(|| {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "SAGA_FAILED".to_string(),
                        "operation failed".to_string(),
                    )
                });
            Err((
                error.0,
                Json(ApiResponse::<()>::error(ErrorResponse::new(error.1, error.2))),
            ))
        }
        Err(e) => Err(reject(&e)),
    }
}

// ============================================================================
// Money operations
// ============================================================================

pub async fn create_deposit(
    State(state): State<AppState>,
    Json(body): Json<CreateOperationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OperationResponse>>), HandlerError> {
    body.validate().map_err(reject_validation)?;
    operation_reply(state.operations.deposit(operation_request(body)).await)
}

pub async fn create_withdrawal(
    State(state): State<AppState>,
    Json(body): Json<CreateOperationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OperationResponse>>), HandlerError> {
    body.validate().map_err(reject_validation)?;
    operation_reply(state.operations.withdraw(operation_request(body)).await)
}

pub async fn create_transfer(
    State(state): State<AppState>,
    Json(body): Json<CreateOperationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OperationResponse>>), HandlerError> {
    body.validate().map_err(reject_validation)?;
    operation_reply(state.operations.transfer(operation_request(body)).await)
}

// ============================================================================
// Wallet balances (projection reads)
// ============================================================================

pub async fn wallet_balance(
    State(state): State<AppState>,
    Path((tenant_id, user_id)): Path<(String, String)>,
    Query(query): Query<WalletBalanceQuery>,
) -> Result<Json<ApiResponse<WalletBalanceResponse>>, HandlerError> {
    match state
        .wallets
        .read_balance(&tenant_id, &user_id, &query.currency, &query.category)
        .await
    {
        Ok(wallet) => Ok(Json(ApiResponse::success(wallet.into()))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn user_balances(
    State(state): State<AppState>,
    Path((tenant_id, user_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<WalletBalanceResponse>>>, HandlerError> {
    match state.wallets.user_balances(&tenant_id, &user_id).await {
        Ok(wallets) => Ok(Json(ApiResponse::success(
            wallets.into_iter().map(WalletBalanceResponse::from).collect(),
        ))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn bulk_wallet_balances(
    State(state): State<AppState>,
    Json(body): Json<BulkBalancesRequest>,
) -> Result<Json<ApiResponse<Vec<WalletBalanceResponse>>>, HandlerError> {
    body.validate().map_err(reject_validation)?;

    let keys: Vec<WalletKey> = body
        .keys
        .into_iter()
        .map(|k| WalletKey {
            user_id: k.user_id,
            currency: k.currency,
            category: k.category,
        })
        .collect();

    match state.wallets.bulk_balances(&body.tenant_id, &keys).await {
        Ok(wallets) => Ok(Json(ApiResponse::success(
            wallets.into_iter().map(WalletBalanceResponse::from).collect(),
        ))),
        Err(e) => Err(reject(&e)),
    }
}

// ============================================================================
// Accounts and transactions (ledger reads + admin reversal)
// ============================================================================

pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AccountResponse>>, HandlerError> {
    match state.ledger.get_account(id).await {
        Ok(account) => Ok(Json(ApiResponse::success(account.into()))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn get_account_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AccountBalanceResponse>>, HandlerError> {
    match state.ledger.get_balance(id).await {
        Ok(view) => Ok(Json(ApiResponse::success(AccountBalanceResponse::new(id, view)))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn get_account_entries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<ApiResponse<EntriesResponse>>, HandlerError> {
    match state
        .ledger
        .entries_for_account(id, query.limit, query.offset)
        .await
    {
        Ok(entries) => Ok(Json(ApiResponse::success(EntriesResponse { entries }))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<crate::models::LedgerTransaction>>, HandlerError> {
    match state.ledger.get_transaction(id).await {
        Ok(tx) => Ok(Json(ApiResponse::success(tx))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ApiResponse<Vec<crate::models::LedgerTransaction>>>, HandlerError> {
    let limit = query.limit.clamp(1, 500);
    match state
        .ledger
        .list_transactions(&query.tenant_id, limit, query.offset.max(0))
        .await
    {
        Ok(txs) => Ok(Json(ApiResponse::success(txs))),
        Err(e) => Err(reject(&e)),
    }
}

pub async fn reverse_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReverseTransactionRequest>,
) -> Result<Json<ApiResponse<crate::models::LedgerTransaction>>, HandlerError> {
    match state
        .ledger
        .reverse(id, body.reason.as_deref(), &body.initiated_by)
        .await
    {
        Ok(outcome) => Ok(Json(ApiResponse::success(outcome.transaction))),
        Err(e) => Err(reject(&e)),
    }
}

// ============================================================================
// Health and metrics
// ============================================================================

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<crate::observability::HealthReport>>, HandlerError> {
    match &state.health_checker {
        Some(checker) => Ok(Json(ApiResponse::success(checker.check().await))),
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error(ErrorResponse::new(
                "NOT_READY",
                "health checker not initialized",
            ))),
        )),
    }
}

pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.pool).await.is_ok();
    if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AppError::Validation("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AppError::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&AppError::DuplicateOperation("x".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AppError::InsufficientFunds {
                account_id: "a".to_string(),
                requested: 10,
                available: 0
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&AppError::Database(sqlx::Error::PoolTimedOut)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
