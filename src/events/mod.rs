pub mod producer;
pub mod projector;
pub mod types;

pub use producer::{EventProducer, EventPublisher, ProducerConfig};
pub use projector::{ConsumedMessage, EventConsumer, MessageHandler, ProjectorConfig, WalletProjector};
pub use types::{EventEnvelope, LedgerCompletedEvent, WalletOpEvent};
