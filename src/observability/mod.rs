pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthChecker, HealthReport, Probe, ProbeStatus};
pub use logging::{init_logging, mask_amount, mask_sensitive, LogConfig, LogFormat};
pub use metrics::{get_metrics, init_metrics, Metrics};
