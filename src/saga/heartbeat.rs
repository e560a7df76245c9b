use crate::error::{AppError, Result};
use crate::models::SagaState;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Key-value store holding in-flight saga state with a TTL.
///
/// This is coordination state, not the audit trail: terminal entries are
/// allowed to expire, durable outcomes live in `saga_outcomes`.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Writes the state under `saga:{saga_id}`, refreshing the TTL and
    /// stamping `last_heartbeat` to now.
    async fn put(&self, state: &SagaState, ttl_ms: u64) -> Result<()>;

    async fn fetch(&self, saga_id: Uuid) -> Result<Option<SagaState>>;

    /// All currently stored states; the recovery scan input.
    async fn scan_states(&self) -> Result<Vec<SagaState>>;

    async fn remove(&self, saga_id: Uuid) -> Result<()>;
}

fn saga_key(saga_id: Uuid) -> String {
    format!("saga:{}", saga_id)
}

/// Production store over Redis.
pub struct RedisHeartbeatStore {
    client: redis::Client,
}

impl RedisHeartbeatStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }
}

#[async_trait]
impl HeartbeatStore for RedisHeartbeatStore {
    async fn put(&self, state: &SagaState, ttl_ms: u64) -> Result<()> {
        let mut stamped = state.clone();
        stamped.last_heartbeat = Utc::now();

        let json = serde_json::to_string(&stamped)
            .map_err(|e| AppError::Internal(anyhow!("failed to serialize saga state: {}", e)))?;

        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(saga_key(state.saga_id))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }

    async fn fetch(&self, saga_id: Uuid) -> Result<Option<SagaState>> {
        let mut conn = self.connection().await?;
        let json: Option<String> = redis::cmd("GET")
            .arg(saga_key(saga_id))
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;

        match json {
            None => Ok(None),
            Some(json) => match serde_json::from_str(&json) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    warn!(saga_id = %saga_id, error = %e, "dropping undecodable saga state");
                    Ok(None)
                }
            },
        }
    }

    async fn scan_states(&self) -> Result<Vec<SagaState>> {
        let mut conn = self.connection().await?;

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("saga:*")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(AppError::Redis)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut states = Vec::with_capacity(keys.len());
        for key in keys {
            let json: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(AppError::Redis)?;
            let Some(json) = json else { continue };
            match serde_json::from_str(&json) {
                Ok(state) => states.push(state),
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable saga state"),
            }
        }
        Ok(states)
    }

    async fn remove(&self, saga_id: Uuid) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(saga_key(saga_id))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }
}

/// In-memory store for tests; honors TTLs on read.
#[derive(Default)]
pub struct InMemoryHeartbeatStore {
    entries: Arc<RwLock<HashMap<Uuid, (SagaState, Instant)>>>,
}

impl InMemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: backdates the stored heartbeat so recovery sees the
    /// saga as stuck.
    pub async fn age_heartbeat(&self, saga_id: Uuid, by: chrono::Duration) {
        let mut entries = self.entries.write().await;
        if let Some((state, _)) = entries.get_mut(&saga_id) {
            state.last_heartbeat -= by;
        }
    }
}

#[async_trait]
impl HeartbeatStore for InMemoryHeartbeatStore {
    async fn put(&self, state: &SagaState, ttl_ms: u64) -> Result<()> {
        let mut stamped = state.clone();
        stamped.last_heartbeat = Utc::now();
        let expires = Instant::now() + Duration::from_millis(ttl_ms);
        self.entries
            .write()
            .await
            .insert(state.saga_id, (stamped, expires));
        Ok(())
    }

    async fn fetch(&self, saga_id: Uuid) -> Result<Option<SagaState>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&saga_id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(state, _)| state.clone()))
    }

    async fn scan_states(&self) -> Result<Vec<SagaState>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|(_, expires)| *expires > now)
            .map(|(state, _)| state.clone())
            .collect())
    }

    async fn remove(&self, saga_id: Uuid) -> Result<()> {
        self.entries.write().await.remove(&saga_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepRecord;

    fn sample_state() -> SagaState {
        SagaState::new(
            Uuid::new_v4(),
            "deposit",
            vec![StepRecord::pending("post_ledger", true)],
        )
    }

    #[tokio::test]
    async fn test_in_memory_put_fetch_remove() {
        let store = InMemoryHeartbeatStore::new();
        let state = sample_state();

        store.put(&state, 60_000).await.unwrap();
        let fetched = store.fetch(state.saga_id).await.unwrap().unwrap();
        assert_eq!(fetched.saga_id, state.saga_id);

        store.remove(state.saga_id).await.unwrap();
        assert!(store.fetch(state.saga_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_ttl_expiry() {
        let store = InMemoryHeartbeatStore::new();
        let state = sample_state();

        store.put(&state, 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.fetch(state.saga_id).await.unwrap().is_none());
        assert!(store.scan_states().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_stamps_heartbeat() {
        let store = InMemoryHeartbeatStore::new();
        let mut state = sample_state();
        state.last_heartbeat = Utc::now() - chrono::Duration::seconds(600);

        store.put(&state, 60_000).await.unwrap();
        let fetched = store.fetch(state.saga_id).await.unwrap().unwrap();
        assert!(fetched.heartbeat_age(Utc::now()) < chrono::Duration::seconds(5));
    }
}
