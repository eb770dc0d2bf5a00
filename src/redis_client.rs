use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use redis::{aio::ConnectionManager, Client};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::metrics::{RECORDS_REJECTED_TOTAL, STORE_FAILURES_TOTAL, STORE_FETCH_SECONDS};
use crate::store::{InsertFeed, RecordStore, StoreError};
use crate::types::DetectionRecord;

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    inner: Arc<Mutex<ConnectionManager>>,
}

impl RedisClient {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url.to_string()).context("Failed to create Redis client")?;
        let manager = client
            .get_tokio_connection_manager()
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self {
            client,
            inner: Arc::new(Mutex::new(manager)),
        })
    }

    pub async fn ensure_connection(&self) -> anyhow::Result<()> {
        let mut conn = self.inner.lock().await;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Redis PING failed")
    }

    /// Members of a sorted set with score >= `min_score`, highest score first.
    pub async fn zrevrange_from(&self, key: &str, min_score: Option<i64>) -> anyhow::Result<Vec<String>> {
        let min = min_score.map_or_else(|| "-inf".to_string(), |score| score.to_string());
        let mut conn = self.inner.lock().await;
        let members: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg("+inf")
            .arg(&min)
            .query_async(&mut *conn)
            .await
            .context("Redis ZREVRANGEBYSCORE failed")?;
        Ok(members)
    }

    /// Adds `payload` to the sorted set and announces it on `channel` in one
    /// MULTI/EXEC so subscribers never hear of a record that was not stored.
    pub async fn zadd_and_publish(&self, key: &str, score: i64, channel: &str, payload: &str) -> anyhow::Result<()> {
        let mut conn = self.inner.lock().await;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZADD").arg(key).arg(score).arg(payload).ignore();
        pipe.cmd("PUBLISH").arg(channel).arg(payload).ignore();
        pipe.query_async::<_, ()>(&mut *conn)
            .await
            .context("Redis pipeline failed for record insert")
    }

    /// Dedicated pub/sub connection; the connection manager cannot subscribe.
    pub async fn subscribe(&self, channel: &str) -> anyhow::Result<BoxStream<'static, String>> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .context("Failed to open Redis pub/sub connection")?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .context("Redis SUBSCRIBE failed")?;
        let messages = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(error = %err, "Dropping non-text pub/sub payload");
                    None
                }
            }
        });
        Ok(messages.boxed())
    }
}

/// Records live in a sorted set scored by epoch milliseconds; inserts are
/// announced on a pub/sub channel.
pub struct RedisRecordStore {
    redis: RedisClient,
    worker_id: String,
    record_key: String,
    insert_channel: String,
    max_retries: u32,
    retry_backoff_base: f64,
}

impl RedisRecordStore {
    pub fn new(redis: RedisClient, settings: &Settings) -> Self {
        Self {
            redis,
            worker_id: settings.worker_id.clone(),
            record_key: settings.redis_record_key.clone(),
            insert_channel: settings.redis_insert_channel.clone(),
            max_retries: settings.max_retries,
            retry_backoff_base: settings.retry_backoff_base,
        }
    }

    async fn fetch_rows(&self, min_score: Option<i64>) -> Result<Vec<String>, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match self.redis.zrevrange_from(&self.record_key, min_score).await {
                Ok(rows) => return Ok(rows),
                Err(err) if attempt < self.max_retries => {
                    let delay = backoff_delay(self.retry_backoff_base, attempt);
                    warn!(
                        worker_id = %self.worker_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Record fetch failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(self.failure("fetch", StoreError::Unavailable(format!("{err:#}")))),
            }
        }
    }

    fn failure(&self, operation: &str, err: StoreError) -> StoreError {
        STORE_FAILURES_TOTAL
            .with_label_values(&[&self.worker_id, operation, err.label()])
            .inc();
        err
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn fetch_since(&self, lower_bound: Option<DateTime<Utc>>) -> Result<Vec<DetectionRecord>, StoreError> {
        let start = Instant::now();
        let rows = self.fetch_rows(lower_bound.map(|bound| bound.timestamp_millis())).await?;
        STORE_FETCH_SECONDS
            .with_label_values(&[&self.worker_id])
            .observe(start.elapsed().as_secs_f64());

        let records = decode_rows(&self.worker_id, &rows).map_err(|err| self.failure("fetch", err))?;
        debug!(worker_id = %self.worker_id, records = records.len(), "Fetched records from Redis");
        Ok(records)
    }

    async fn subscribe(&self) -> Result<InsertFeed, StoreError> {
        let messages = self
            .redis
            .subscribe(&self.insert_channel)
            .await
            .map_err(|err| self.failure("subscribe", StoreError::Unavailable(format!("{err:#}"))))?;
        let worker_id = self.worker_id.clone();
        let feed = messages.map(move |payload| {
            decode_record(&worker_id, "feed", &payload).map_err(|err| StoreError::Malformed(err.to_string()))
        });
        Ok(feed.boxed())
    }

    async fn insert(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.redis
            .zadd_and_publish(
                &self.record_key,
                record.timestamp().timestamp_millis(),
                &self.insert_channel,
                &payload,
            )
            .await
            .map_err(|err| self.failure("insert", StoreError::Unavailable(format!("{err:#}"))))
    }
}

/// Decodes a fetched page. One unreadable row fails the whole fetch so a
/// snapshot never silently undercounts.
fn decode_rows(worker_id: &str, rows: &[String]) -> Result<Vec<DetectionRecord>, StoreError> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            decode_record(worker_id, "fetch", row)
                .map_err(|err| StoreError::Malformed(format!("row {index}: {err}")))
        })
        .collect()
}

fn decode_record(worker_id: &str, source: &str, payload: &str) -> Result<DetectionRecord, serde_json::Error> {
    serde_json::from_str::<DetectionRecord>(payload).map_err(|err| {
        RECORDS_REJECTED_TOTAL
            .with_label_values(&[worker_id, source])
            .inc();
        warn!(worker_id, source, error = %err, "Malformed record");
        err
    })
}

/// `base * 2^attempt` seconds.
fn backoff_delay(base: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(base * 2f64.powi(attempt.min(16) as i32))
}
