use crate::error::{AppError, Result};
use crate::events::types::{EventEnvelope, LedgerCompletedEvent, WalletOpEvent};
use crate::models::LedgerTransaction;
use crate::observability::get_metrics;
use anyhow::anyhow;
use chrono::Utc;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::Client as KafkaClient;
use rskafka::record::Record;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Configuration for the Kafka producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_ms: 100,
        }
    }
}

/// Kafka producer with a per-topic partition-client cache.
pub struct EventProducer {
    client: Arc<KafkaClient>,
    config: ProducerConfig,
    partition_clients: RwLock<BTreeMap<String, Arc<PartitionClient>>>,
}

impl EventProducer {
    pub fn new(client: Arc<KafkaClient>, config: ProducerConfig) -> Self {
        Self {
            client,
            config,
            partition_clients: RwLock::new(BTreeMap::new()),
        }
    }

    async fn get_partition_client(&self, topic: &str) -> Result<Arc<PartitionClient>> {
        {
            let clients = self.partition_clients.read().await;
            if let Some(client) = clients.get(topic) {
                return Ok(client.clone());
            }
        }

        let partition_client = self
            .client
            .partition_client(topic.to_string(), 0, UnknownTopicHandling::Retry)
            .await
            .map_err(|e| AppError::Internal(anyhow!("failed to get partition client: {}", e)))?;

        let client = Arc::new(partition_client);
        {
            let mut clients = self.partition_clients.write().await;
            clients.insert(topic.to_string(), client.clone());
        }
        Ok(client)
    }

    /// Sends one JSON message, retrying with linear backoff.
    pub async fn send<T: Serialize>(&self, topic: &str, key: Option<&str>, payload: &T) -> Result<i64> {
        let json = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(anyhow!("failed to serialize payload: {}", e)))?;

        let partition_client = self.get_partition_client(topic).await?;
        let record = Record {
            key: key.map(|k| k.as_bytes().to_vec()),
            value: Some(json),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        let mut last_error = None;
        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(
                    self.config.retry_delay_ms * attempt as u64,
                ))
                .await;
            }

            match partition_client
                .produce(vec![record.clone()], Compression::NoCompression)
                .await
            {
                Ok(offsets) => {
                    let offset = offsets.first().copied().unwrap_or(0);
                    debug!(topic = %topic, offset = offset, "event published");
                    get_metrics().record_event_published(topic, true);
                    return Ok(offset);
                }
                Err(e) => {
                    warn!(topic = %topic, attempt = attempt, error = %e, "event publish attempt failed");
                    last_error = Some(e);
                }
            }
        }

        get_metrics().record_event_published(topic, false);
        Err(AppError::Internal(anyhow!(
            "failed to publish to '{}' after {} retries: {:?}",
            topic,
            self.config.retry_count,
            last_error
        )))
    }
}

/// Fire-and-forget publication handle shared across services.
///
/// Operations must not fail because publication failed: every publish runs
/// on a detached task and only logs on error. A disabled publisher (no
/// Kafka) drops events silently; the wallet projection reconciles on demand.
#[derive(Clone)]
pub struct EventPublisher {
    producer: Option<Arc<EventProducer>>,
}

impl EventPublisher {
    pub fn new(producer: Arc<EventProducer>) -> Self {
        Self {
            producer: Some(producer),
        }
    }

    pub fn disabled() -> Self {
        Self { producer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.producer.is_some()
    }

    /// Publishes `ledger.{type}.completed` for a freshly-posted transaction.
    pub fn publish_ledger_completed(&self, tx: &LedgerTransaction) {
        let Some(producer) = self.producer.clone() else {
            return;
        };
        let event = LedgerCompletedEvent::from_transaction(tx);
        let topic = event.topic();
        let key = tx.tenant_id.clone();
        let envelope = EventEnvelope::new(topic.clone(), event);

        tokio::spawn(async move {
            if let Err(e) = producer.send(&topic, Some(&key), &envelope).await {
                warn!(topic = %topic, error = %e, "dropping ledger event after publish failure");
            }
        });
    }

    /// Publishes `wallet.{op}.completed` after a money operation.
    pub fn publish_wallet_completed(&self, op: &'static str, event: WalletOpEvent) {
        let Some(producer) = self.producer.clone() else {
            return;
        };
        let topic = super::types::topics::wallet_completed(op);
        let key = event.tenant_id.clone();
        let envelope = EventEnvelope::new(topic.clone(), event);

        tokio::spawn(async move {
            if let Err(e) = producer.send(&topic, Some(&key), &envelope).await {
                warn!(topic = %topic, error = %e, "dropping wallet event after publish failure");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_config_default() {
        let config = ProducerConfig::default();
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay_ms, 100);
    }

    #[test]
    fn test_disabled_publisher_is_inert() {
        let publisher = EventPublisher::disabled();
        assert!(!publisher.is_enabled());
    }
}
