use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub kafka: KafkaSettings,
    pub application: ApplicationSettings,
    pub saga: SagaSettings,
    pub idempotency: IdempotencySettings,
    pub fees: FeeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSettings {
    pub brokers: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub port: u16,
    pub log_level: String,
}

/// Saga coordination knobs. The heartbeat interval must be well below the
/// stuck threshold, and the recovery scan at most half the stuck threshold.
#[derive(Debug, Clone, Deserialize)]
pub struct SagaSettings {
    pub use_transaction: bool,
    pub max_retries: u32,
    pub heartbeat_interval_ms: u64,
    pub stuck_threshold_ms: u64,
    pub recovery_scan_ms: u64,
    pub operation_timeout_ms: u64,
}

impl SagaSettings {
    /// TTL for in-flight saga state in the heartbeat store.
    pub fn state_ttl_ms(&self) -> u64 {
        (self.heartbeat_interval_ms * 12).max(self.stuck_threshold_ms * 2)
    }
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            use_transaction: true,
            max_retries: 3,
            heartbeat_interval_ms: 5_000,
            stuck_threshold_ms: 30_000,
            recovery_scan_ms: 15_000,
            operation_timeout_ms: 60_000,
        }
    }
}

/// Idempotency key derivation. The time window is the single configured
/// constant; callers needing stricter replay boundaries must supply an
/// explicit external reference.
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub window_ms: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self { window_ms: 120_000 }
    }
}

/// Fee policy: percent per operation method, with a default fallback.
/// Percents are expressed as decimal fractions of a percent, e.g. "2.9".
#[derive(Debug, Clone, Deserialize)]
pub struct FeeSettings {
    pub default_fee_percent: Decimal,
    #[serde(default)]
    pub policy: HashMap<String, Decimal>,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            default_fee_percent: Decimal::ZERO,
            policy: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
