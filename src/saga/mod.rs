pub mod coordinator;
pub mod heartbeat;
pub mod recovery;

pub use coordinator::{CompensationLog, SagaCoordinator, SagaOptions, SagaReport, SagaStep};
pub use heartbeat::{HeartbeatStore, InMemoryHeartbeatStore, RedisHeartbeatStore};
pub use recovery::RecoveryService;
