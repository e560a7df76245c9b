pub mod account_repository;
pub mod entry_repository;
pub mod saga_audit_repository;
pub mod sequence_repository;
pub mod transaction_repository;
pub mod transfer_repository;
pub mod wallet_repository;

pub use account_repository::AccountRepository;
pub use entry_repository::EntryRepository;
pub use saga_audit_repository::SagaAuditRepository;
pub use sequence_repository::SequenceRepository;
pub use transaction_repository::TransactionRepository;
pub use transfer_repository::TransferRepository;
pub use wallet_repository::WalletRepository;

use sqlx::PgPool;

/// Database connection pool type alias.
pub type DbPool = PgPool;
