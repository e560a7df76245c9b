pub mod account_service;
pub mod fee_policy;
pub mod ledger_service;
pub mod operations;
pub mod permission_oracle;
pub mod posting_engine;
pub mod wallet_service;

pub use account_service::AccountService;
pub use fee_policy::FeePolicy;
pub use ledger_service::{BalanceView, LedgerService};
pub use operations::{
    OperationDeps, OperationKind, OperationRequest, OperationResult, OperationService,
};
pub use permission_oracle::{HttpPermissionOracle, PermissionOracle, StaticPermissionOracle};
pub use posting_engine::{PostOutcome, PostRequest, PostingEngine, PostingPlan};
pub use wallet_service::{WalletKey, WalletService};
