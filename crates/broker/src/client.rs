//! The Redis-backed broker client. Every mutating operation that touches
//! more than one key goes through a single `redis::pipe()` so it executes
//! atomically against a single-writer-per-key broker (§4.1, §5).

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sitesearch_common::model::Envelope;
use sitesearch_common::retry::{with_retry, RetryPolicy};
use sitesearch_common::{CoreError, Result};
use std::sync::LazyLock;
use std::time::Duration;
use uuid::Uuid;

use crate::keys;
use crate::metrics::QueueMetrics;

/// Bound on the `processing_times:Q` ring (§4.1).
const PROCESSING_TIMES_CAP: isize = 100;

/// Atomically pops one envelope from `queue:Q` (KEYS[1]) and records it as
/// claimed in `processing:Q` (KEYS[2]) plus `stats:Q` (KEYS[3]), so a crash
/// between the pop and the processing-set write is impossible.
static CLAIM_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
        local body = redis.call('RPOP', KEYS[1])
        if body then
            redis.call('SADD', KEYS[2], body)
            redis.call('HINCRBY', KEYS[3], 'processing', 1)
            redis.call('HINCRBY', KEYS[3], 'pending', -1)
        end
        return body
        ",
    )
});

#[derive(Clone)]
pub struct QueueBroker {
    conn: ConnectionManager,
}

impl QueueBroker {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CoreError::Broker(e.to_string()))?;
        let conn = with_retry(RetryPolicy::broker(), || async {
            client
                .get_connection_manager()
                .await
                .map_err(|e| CoreError::Broker(e.to_string()))
        })
        .await?;
        Ok(Self { conn })
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy::broker()
    }

    /// §4.1 `enqueue(Q, payload) -> task_id`. Assigns a fresh envelope id,
    /// pushes it onto the head of `queue:Q` (`LPUSH`), and increments the
    /// pending counter — all in one pipeline.
    pub async fn enqueue<T>(&self, queue: &str, payload: T) -> Result<Uuid>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.enqueue_with_id(queue, Uuid::new_v4(), payload).await
    }

    /// Like [`Self::enqueue`] but with a caller-supplied `task_id`, used by
    /// downstream worker stages that must preserve the `task_id` assigned
    /// upstream (invariant 6: "every queued task carries a `task_id`; the
    /// `task_id` is preserved across all downstream stages").
    pub async fn enqueue_with_id<T>(&self, queue: &str, task_id: Uuid, payload: T) -> Result<Uuid>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let envelope = Envelope::new(task_id, payload);
        let body = serde_json::to_string(&envelope)?;
        let queue_key = keys::queue(queue);
        let stats_key = keys::stats(queue);

        let mut conn = self.conn.clone();
        with_retry(Self::retry_policy(), || {
            let mut conn = conn.clone();
            let body = body.clone();
            let queue_key = queue_key.clone();
            let stats_key = stats_key.clone();
            async move {
                redis::pipe()
                    .atomic()
                    .lpush(&queue_key, &body)
                    .hincr(&stats_key, "pending", 1)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| CoreError::Broker(e.to_string()))
            }
        })
        .await?;

        Ok(task_id)
    }

    /// §4.1 `claim_batch(Q, n) -> [envelopes]`. Pops up to `n` envelopes
    /// from the tail of `queue:Q` (oldest first, since push is `LPUSH`) and
    /// moves each into `processing:Q`.
    ///
    /// The pop and the `processing:Q` membership write happen inside one
    /// `EVAL`, so the broker's atomicity guarantee (§4.1 "races are
    /// prevented by using the broker's atomic list-move primitive") holds
    /// even though `processing:Q` is a set rather than a list: a crash
    /// between the two can never leave an envelope in neither key.
    pub async fn claim_batch<T>(&self, queue: &str, n: usize) -> Result<Vec<Envelope<T>>>
    where
        T: DeserializeOwned,
    {
        let queue_key = keys::queue(queue);
        let processing_key = keys::processing(queue);
        let stats_key = keys::stats(queue);
        let mut conn = self.conn.clone();

        let mut bodies: Vec<String> = Vec::with_capacity(n);
        for _ in 0..n {
            let popped: Option<String> = with_retry(Self::retry_policy(), || {
                let mut conn = conn.clone();
                let queue_key = queue_key.clone();
                let processing_key = processing_key.clone();
                let stats_key = stats_key.clone();
                async move {
                    CLAIM_SCRIPT
                        .key(queue_key)
                        .key(processing_key)
                        .key(stats_key)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| CoreError::Broker(e.to_string()))
                }
            })
            .await?;

            match popped {
                Some(body) => bodies.push(body),
                None => break,
            }
        }

        if bodies.is_empty() {
            return Ok(Vec::new());
        }

        self.touch_last_activity(queue).await?;

        bodies
            .into_iter()
            .map(|body| serde_json::from_str::<Envelope<T>>(&body).map_err(CoreError::from))
            .collect()
    }

    /// §4.1 `ack_success`. Removes from `processing:Q`, records completion,
    /// and appends `duration` to the bounded processing-time ring.
    pub async fn ack_success<T>(
        &self,
        queue: &str,
        envelope: &Envelope<T>,
        duration: Duration,
    ) -> Result<()>
    where
        T: Serialize,
    {
        let body = serde_json::to_string(envelope)?;
        let processing_key = keys::processing(queue);
        let completed_key = keys::completed(queue);
        let stats_key = keys::stats(queue);
        let times_key = keys::processing_times(queue);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .srem(&processing_key, &body)
            .sadd(&completed_key, &body)
            .hincr(&stats_key, "processing", -1)
            .hincr(&stats_key, "completed", 1)
            .hincr(&stats_key, "total_processing_time_millis", duration.as_millis() as i64)
            .lpush(&times_key, duration.as_millis() as i64)
            .ltrim(&times_key, 0, PROCESSING_TIMES_CAP - 1)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;

        self.touch_last_activity(queue).await
    }

    /// §4.1 `ack_skip`. Removes from `processing:Q`; no further record.
    pub async fn ack_skip<T>(&self, queue: &str, envelope: &Envelope<T>) -> Result<()>
    where
        T: Serialize,
    {
        let body = serde_json::to_string(envelope)?;
        let processing_key = keys::processing(queue);
        let stats_key = keys::stats(queue);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .srem(&processing_key, &body)
            .hincr(&stats_key, "processing", -1)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;

        self.touch_last_activity(queue).await
    }

    /// §4.1 `ack_failure`. Removes from `processing:Q`, pushes to
    /// `failed:Q` with `{error, envelope, timestamp}`.
    pub async fn ack_failure<T>(&self, queue: &str, envelope: &Envelope<T>, error: &str) -> Result<()>
    where
        T: Serialize,
    {
        let body = serde_json::to_string(envelope)?;
        let record = serde_json::json!({
            "error": error,
            "envelope": envelope_as_value(envelope)?,
            "timestamp": Utc::now().timestamp(),
        });
        let processing_key = keys::processing(queue);
        let failed_key = keys::failed(queue);
        let stats_key = keys::stats(queue);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .srem(&processing_key, &body)
            .sadd(&failed_key, record.to_string())
            .hincr(&stats_key, "processing", -1)
            .hincr(&stats_key, "failed", 1)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;

        self.touch_last_activity(queue).await
    }

    /// §4.1 `metrics(Q)`.
    pub async fn metrics(&self, queue: &str) -> Result<QueueMetrics> {
        let queue_key = keys::queue(queue);
        let processing_key = keys::processing(queue);
        let completed_key = keys::completed(queue);
        let failed_key = keys::failed(queue);
        let times_key = keys::processing_times(queue);
        let activity_key = keys::last_activity(queue);
        let mut conn = self.conn.clone();

        let pending: i64 = conn
            .llen(&queue_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;
        let processing: i64 = conn
            .scard(&processing_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;
        let completed: i64 = conn
            .scard(&completed_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;
        let failed: i64 = conn
            .scard(&failed_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;
        let times: Vec<i64> = conn
            .lrange(&times_key, 0, PROCESSING_TIMES_CAP - 1)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;
        let last_activity: Option<i64> = conn
            .get(&activity_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;

        let avg_processing_time_secs = if times.is_empty() {
            0.0
        } else {
            let sum: i64 = times.iter().sum();
            (sum as f64 / times.len() as f64) / 1000.0
        };

        Ok(QueueMetrics {
            queue: queue.to_string(),
            pending,
            processing,
            completed,
            failed,
            avg_processing_time_secs,
            last_activity,
        })
    }

    async fn touch_last_activity(&self, queue: &str) -> Result<()> {
        let key = keys::last_activity(queue);
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&key, Utc::now().timestamp())
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    /// Add `member` to a broker-managed set, returning `true` if it was not
    /// already present (used by the crawler's dedup check, §4.5 step 2).
    pub async fn set_add(&self, set_key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(set_key, member)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))?;
        Ok(added == 1)
    }

    pub async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(set_key, member)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    pub async fn set_cardinality(&self, set_key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.scard(set_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    /// Push a raw string (typically a URL) onto a per-task input queue.
    pub async fn push_raw(&self, queue_key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(queue_key, value)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    /// Pop a raw string from a per-task input queue (FIFO: tail pop).
    pub async fn pop_raw(&self, queue_key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.rpop(queue_key, None)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    pub async fn raw_queue_len(&self, queue_key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.llen(queue_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    /// Set a single field of a Redis hash — the indexer's chunk document
    /// store backing (§4.3: "a document store ... for raw chunk texts and
    /// metadata").
    pub async fn hash_set(&self, hash_key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(hash_key, field, value)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    pub async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(hash_key, field)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    pub async fn hash_del(&self, hash_key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(hash_key, field)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    pub async fn hash_exists(&self, hash_key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.hexists(hash_key, field)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    pub async fn hash_keys(&self, hash_key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.hkeys(hash_key)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }

    /// §4.11/§4.10: clear a task's pending queue, e.g. when `max_urls` is
    /// reached or a task completes.
    pub async fn delete_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| CoreError::Broker(e.to_string()))
    }
}

fn envelope_as_value<T: Serialize>(envelope: &Envelope<T>) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(envelope)?)
}
