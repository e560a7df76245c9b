use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rskafka::client::Client as KafkaClient;
use sqlx::PgPool;
use std::sync::Arc;

use super::handlers;
use crate::observability::HealthChecker;
use crate::services::{AccountService, LedgerService, OperationService, WalletService};

/// Shared handle passed to every request handler. Built once in `main`;
/// there is no process-wide ledger singleton.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub redis_client: redis::Client,
    pub kafka_client: Option<Arc<KafkaClient>>,
    pub ledger: Arc<LedgerService>,
    pub accounts: Arc<AccountService>,
    pub wallets: Arc<WalletService>,
    pub operations: Arc<OperationService>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub health_checker: Option<Arc<HealthChecker>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        redis_client: redis::Client,
        kafka_client: Option<Arc<KafkaClient>>,
        ledger: Arc<LedgerService>,
        accounts: Arc<AccountService>,
        wallets: Arc<WalletService>,
        operations: Arc<OperationService>,
    ) -> Self {
        Self {
            pool,
            redis_client,
            kafka_client,
            ledger,
            accounts,
            wallets,
            operations,
            metrics_handle: None,
            health_checker: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn with_health_checker(mut self, checker: Arc<HealthChecker>) -> Self {
        self.health_checker = Some(checker);
        self
    }
}

/// Builds the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Money operations
        .route("/operations/deposit", post(handlers::create_deposit))
        .route("/operations/withdrawal", post(handlers::create_withdrawal))
        .route("/operations/transfer", post(handlers::create_transfer))
        // Wallet projection reads
        .route("/wallets/:tenant_id/:user_id/balance", get(handlers::wallet_balance))
        .route("/wallets/:tenant_id/:user_id", get(handlers::user_balances))
        .route("/wallets/balances/bulk", post(handlers::bulk_wallet_balances))
        // Ledger reads + admin reversal
        .route("/accounts/:id", get(handlers::get_account))
        .route("/accounts/:id/balance", get(handlers::get_account_balance))
        .route("/accounts/:id/entries", get(handlers::get_account_entries))
        .route("/transactions", get(handlers::list_transactions))
        .route("/transactions/:id", get(handlers::get_transaction))
        .route("/transactions/:id/reverse", post(handlers::reverse_transaction))
        .with_state(state)
}
