use crate::error::{AppError, Result};
use crate::events::types::{EventEnvelope, LedgerCompletedEvent};
use crate::models::LedgerTransactionType;
use crate::services::WalletService;
use anyhow::anyhow;
use async_trait::async_trait;
use rskafka::client::partition::{PartitionClient, UnknownTopicHandling};
use rskafka::client::Client as KafkaClient;
use rskafka::record::RecordAndOffset;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for the projection consumer.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub topics: Vec<String>,
    pub poll_interval_ms: u64,
    pub fetch_max_wait_ms: i32,
    pub max_poll_records: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            topics: LedgerTransactionType::ALL
                .iter()
                .map(|t| super::types::topics::ledger_completed(*t))
                .collect(),
            poll_interval_ms: 250,
            fetch_max_wait_ms: 500,
            max_poll_records: 100,
        }
    }
}

/// A message consumed from the event bus.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic: String,
    pub offset: i64,
    pub value: Vec<u8>,
}

/// Handler for consumed messages. Failures are logged and skipped; the
/// projection must tolerate missed events because reads reconcile on demand.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()>;
}

/// Kafka consumer feeding the wallet projection.
pub struct EventConsumer {
    client: Arc<KafkaClient>,
    config: ProjectorConfig,
    partition_clients: Arc<RwLock<BTreeMap<String, Arc<PartitionClient>>>>,
    offsets: Arc<RwLock<BTreeMap<String, AtomicI64>>>,
    running: Arc<AtomicBool>,
}

impl EventConsumer {
    pub fn new(client: Arc<KafkaClient>, config: ProjectorConfig) -> Self {
        Self {
            client,
            config,
            partition_clients: Arc::new(RwLock::new(BTreeMap::new())),
            offsets: Arc::new(RwLock::new(BTreeMap::new())),
            running: Arc::new(AtomicBool::new(false)),
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
        {
            let mut offsets = self.offsets.write().await;
            offsets
                .entry(topic.to_string())
                .or_insert_with(|| AtomicI64::new(0));
        }
        Ok(client)
    }

    async fn current_offset(&self, topic: &str) -> i64 {
        let offsets = self.offsets.read().await;
        offsets
            .get(topic)
            .map(|o| o.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    async fn store_offset(&self, topic: &str, offset: i64) {
        let offsets = self.offsets.read().await;
        if let Some(o) = offsets.get(topic) {
            o.store(offset, Ordering::SeqCst);
        }
    }

    /// Fetches the next batch from one topic.
    pub async fn poll(&self, topic: &str) -> Result<Vec<ConsumedMessage>> {
        let partition_client = self.get_partition_client(topic).await?;
        let offset = self.current_offset(topic).await;

        let (records, _high_watermark) = partition_client
            .fetch_records(offset, 1..1_000_000, self.config.fetch_max_wait_ms)
            .await
            .map_err(|e| AppError::Internal(anyhow!("failed to fetch records: {}", e)))?;

        let messages: Vec<ConsumedMessage> = records
            .into_iter()
            .take(self.config.max_poll_records)
            .map(|r: RecordAndOffset| ConsumedMessage {
                topic: topic.to_string(),
                offset: r.offset,
                value: r.record.value.unwrap_or_default(),
            })
            .collect();

        if let Some(last) = messages.last() {
            self.store_offset(topic, last.offset + 1).await;
        }
        Ok(messages)
    }

    /// Runs the consume loop until `stop` is called.
    pub async fn run<H: MessageHandler + 'static>(&self, handler: Arc<H>) {
        self.running.store(true, Ordering::SeqCst);
        info!(topics = ?self.config.topics, "projection consumer started");

        while self.running.load(Ordering::SeqCst) {
            for topic in self.config.topics.clone() {
                let messages = match self.poll(&topic).await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "poll failed, will retry");
                        continue;
                    }
                };

                for message in messages {
                    if let Err(e) = handler.handle(&message).await {
                        // Skipped messages are recovered by on-demand sync.
                        warn!(
                            topic = %message.topic,
                            offset = message.offset,
                            error = %e,
                            "projection handler failed, skipping message"
                        );
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
        info!("projection consumer stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Projects `ledger.*.completed` events into the wallet table by re-reading
/// the affected accounts from the ledger.
pub struct WalletProjector {
    wallet_service: Arc<WalletService>,
}

impl WalletProjector {
    pub fn new(wallet_service: Arc<WalletService>) -> Self {
        Self { wallet_service }
    }
}

#[async_trait]
impl MessageHandler for WalletProjector {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        let envelope: EventEnvelope<LedgerCompletedEvent> = serde_json::from_slice(&message.value)
            .map_err(|e| AppError::Internal(anyhow!("malformed ledger event: {}", e)))?;

        let event = envelope.payload;
        debug!(tx_id = %event.tx_id, topic = %message.topic, "projecting ledger event");

        self.wallet_service
            .sync_for_accounts(&[event.from_account_id, event.to_account_id])
            .await
    }
}
