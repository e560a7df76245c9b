use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Probe outcome for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Slow,
    Down,
}

impl ProbeStatus {
    pub fn is_up(&self) -> bool {
        !matches!(self, ProbeStatus::Down)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub status: ProbeStatus,
    pub latency_ms: Option<f64>,
    pub detail: Option<String>,
}

impl Probe {
    fn up(name: &str, latency_ms: f64) -> Self {
        let status = if latency_ms > 100.0 {
            ProbeStatus::Slow
        } else {
            ProbeStatus::Up
        };
        Self {
            name: name.to_string(),
            status,
            latency_ms: Some(latency_ms),
            detail: None,
        }
    }

    fn down(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: ProbeStatus::Down,
            latency_ms: None,
            detail: Some(detail.into()),
        }
    }
}

/// Combined health report. The engine is ready when the ledger store is up;
/// a missing event bus only degrades (the projection reconciles on demand).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub ready: bool,
    pub version: String,
    pub uptime_seconds: u64,
    pub probes: Vec<Probe>,
}

/// Probes the ledger store, the saga heartbeat store and the event bus.
pub struct HealthChecker {
    pool: PgPool,
    redis_client: redis::Client,
    kafka_client: Option<Arc<rskafka::client::Client>>,
    started: Instant,
}

impl HealthChecker {
    pub fn new(
        pool: PgPool,
        redis_client: redis::Client,
        kafka_client: Option<Arc<rskafka::client::Client>>,
    ) -> Self {
        Self {
            pool,
            redis_client,
            kafka_client,
            started: Instant::now(),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let probes = vec![
            self.probe_ledger_store().await,
            self.probe_heartbeat_store().await,
            self.probe_event_bus().await,
        ];

        let ready = probes
            .iter()
            .find(|p| p.name == "ledger-store")
            .map(|p| p.status.is_up())
            .unwrap_or(false);
        let healthy = probes.iter().all(|p| p.status.is_up());

        HealthReport {
            healthy,
            ready,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            probes,
        }
    }

    async fn probe_ledger_store(&self) -> Probe {
        let start = Instant::now();
        match tokio::time::timeout(
            Duration::from_secs(5),
            sqlx::query("SELECT 1").fetch_one(&self.pool),
        )
        .await
        {
            Ok(Ok(_)) => Probe::up("ledger-store", start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => Probe::down("ledger-store", format!("query failed: {}", e)),
            Err(_) => Probe::down("ledger-store", "timeout"),
        }
    }

    async fn probe_heartbeat_store(&self) -> Probe {
        let start = Instant::now();
        match self.redis_client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                match tokio::time::timeout(
                    Duration::from_secs(2),
                    redis::cmd("PING").query_async::<_, String>(&mut conn),
                )
                .await
                {
                    Ok(Ok(_)) => Probe::up("heartbeat-store", start.elapsed().as_secs_f64() * 1000.0),
                    Ok(Err(e)) => Probe::down("heartbeat-store", format!("ping failed: {}", e)),
                    Err(_) => Probe::down("heartbeat-store", "timeout"),
                }
            }
            Err(e) => Probe::down("heartbeat-store", format!("connection failed: {}", e)),
        }
    }

    async fn probe_event_bus(&self) -> Probe {
        match &self.kafka_client {
            Some(client) => {
                let start = Instant::now();
                match tokio::time::timeout(Duration::from_secs(2), client.list_topics()).await {
                    Ok(Ok(_)) => Probe::up("event-bus", start.elapsed().as_secs_f64() * 1000.0),
                    Ok(Err(e)) => Probe::down("event-bus", format!("metadata failed: {}", e)),
                    Err(_) => Probe::down("event-bus", "timeout"),
                }
            }
            None => Probe::down("event-bus", "not configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_latency_thresholds() {
        assert_eq!(Probe::up("x", 10.0).status, ProbeStatus::Up);
        assert_eq!(Probe::up("x", 500.0).status, ProbeStatus::Slow);
        assert!(Probe::up("x", 500.0).status.is_up());
        assert!(!Probe::down("x", "nope").status.is_up());
    }
}
