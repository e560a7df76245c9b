pub mod account;
pub mod currency;
pub mod ledger_entry;
pub mod metadata;
pub mod saga;
pub mod transaction;
pub mod transfer;
pub mod wallet;

pub use account::{Account, AccountPolicy, AccountStatus, AccountSubtype};
pub use currency::CurrencyCode;
pub use ledger_entry::{EntryDirection, EntryPair, LedgerEntry};
pub use metadata::{Metadata, MetadataValue};
pub use saga::{CompensationRecord, SagaOutcome, SagaState, SagaStatus, StepRecord, StepStatus};
pub use transaction::{ChargeRole, LedgerTransaction, LedgerTransactionType, TransactionStatus};
pub use transfer::{Transfer, TransferStateMachine, TransferStatus};
pub use wallet::{Wallet, WalletStatus};
