use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::config::{Settings, StoreBackend};
use crate::redis_client::{RedisClient, RedisRecordStore};
use crate::types::DetectionRecord;

/// Live feed of records persisted anywhere in the system. An `Err` item means
/// notifications were lost or unreadable; the consumer must re-fetch.
pub type InsertFeed = BoxStream<'static, Result<DetectionRecord, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("failed to encode record: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("malformed stored record: {0}")]
    Malformed(String),
    #[error("insert feed fell behind; {0} notifications dropped")]
    Lagged(u64),
}

impl StoreError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Encoding(_) => "encoding",
            Self::Malformed(_) => "malformed",
            Self::Lagged(_) => "lagged",
        }
    }
}

/// Append-only, timestamp-ordered record source.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records with `timestamp >= lower_bound` (all when `None`), newest first.
    async fn fetch_since(&self, lower_bound: Option<DateTime<Utc>>) -> Result<Vec<DetectionRecord>, StoreError>;

    /// Subscribes to inserts. Delivery is at-least-once; consumers dedupe by id.
    async fn subscribe(&self) -> Result<InsertFeed, StoreError>;

    async fn insert(&self, record: &DetectionRecord) -> Result<(), StoreError>;
}

pub async fn build_record_store(settings: &Settings) -> anyhow::Result<Arc<dyn RecordStore>> {
    match settings.record_store {
        StoreBackend::Memory => Ok(Arc::new(MemoryRecordStore::new(settings.feed_buffer))),
        StoreBackend::Redis => {
            let url = settings
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL is required for the redis record store"))?;
            let redis = RedisClient::new(url).await?;
            redis.ensure_connection().await?;
            Ok(Arc::new(RedisRecordStore::new(redis, settings)))
        }
    }
}

/// Process-local store; inserts fan out to every subscriber.
pub struct MemoryRecordStore {
    records: RwLock<Vec<DetectionRecord>>,
    inserts: broadcast::Sender<DetectionRecord>,
}

impl MemoryRecordStore {
    pub fn new(feed_buffer: usize) -> Self {
        let (inserts, _) = broadcast::channel(feed_buffer.max(1));
        Self {
            records: RwLock::new(Vec::new()),
            inserts,
        }
    }

    /// Re-announces a record that is already stored, as an at-least-once
    /// feed may do.
    #[cfg(test)]
    pub fn redeliver(&self, record: DetectionRecord) {
        let _ = self.inserts.send(record);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_since(&self, lower_bound: Option<DateTime<Utc>>) -> Result<Vec<DetectionRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<DetectionRecord> = records
            .iter()
            .filter(|record| lower_bound.map_or(true, |bound| record.timestamp() >= bound))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        Ok(matching)
    }

    async fn subscribe(&self) -> Result<InsertFeed, StoreError> {
        let receiver = self.inserts.subscribe();
        let feed = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(record) => Some((Ok(record), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Some((Err(StoreError::Lagged(skipped)), receiver)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(feed.boxed())
    }

    async fn insert(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        // No subscribers is not an error; the record is durable regardless.
        let _ = self.inserts.send(record.clone());
        Ok(())
    }
}
