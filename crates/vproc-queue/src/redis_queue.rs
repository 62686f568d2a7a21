//! Job queue on Redis lists.
//!
//! Jobs wait in a pending list. A worker claims one with `BLMOVE`, which moves
//! it atomically to an in-flight list, so a crash between claim and completion
//! never loses the job: the recovery sweep finds it there and pushes it back.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use vproc_models::{ProcessingJob, VideoId};

use crate::error::{QueueError, QueueResult};
use crate::queue::{bump_retry, payload_video_id, JobQueue, QueueConfig, RequeueOutcome};

/// Moves one in-flight entry back to pending, only if it is still in flight.
const RECLAIM_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) > 0 then
  redis.call('RPUSH', KEYS[2], ARGV[1])
  redis.call('HDEL', KEYS[3], ARGV[2])
  return 1
end
return 0
";

/// Redis-backed job queue.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Check that Redis answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Raw in-flight entries belonging to `video_id`.
    async fn inflight_entries_for(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        video_id: &str,
    ) -> QueueResult<Vec<String>> {
        let entries: Vec<String> = conn.lrange(&self.config.inflight_key, 0, -1).await?;
        Ok(entries
            .into_iter()
            .filter(|raw| payload_video_id(raw).as_deref() == Some(video_id))
            .collect())
    }

    /// Number of jobs currently claimed by workers.
    pub async fn inflight_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.llen(&self.config.inflight_key).await?;
        Ok(len)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &ProcessingJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn().await?;
        let _: () = conn.rpush(&self.config.pending_key, payload).await?;

        info!(video_id = %job.video_id, "Enqueued processing job");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<ProcessingJob>> {
        // Blocking commands stall a multiplexed connection, so each dequeue
        // gets its own.
        let mut conn = self.conn().await?;

        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.config.pending_key)
            .arg(&self.config.inflight_key)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<ProcessingJob>(&raw) {
            Ok(job) => {
                let _: () = conn
                    .hset(
                        &self.config.lease_key,
                        job.video_id.as_str(),
                        chrono::Utc::now().timestamp(),
                    )
                    .await?;
                debug!(video_id = %job.video_id, retry_count = job.retry_count, "Dequeued job");
                Ok(Some(job))
            }
            Err(e) => {
                warn!(error = %e, payload = %raw, "Removing malformed job payload");
                metrics::counter!("vproc_queue_malformed_total").increment(1);
                let _: () = conn.lrem(&self.config.inflight_key, 1, &raw).await?;
                Ok(None)
            }
        }
    }

    async fn requeue(&self, job: &ProcessingJob) -> QueueResult<RequeueOutcome> {
        let (next, outcome) = bump_retry(job);
        let mut conn = self.conn().await?;
        let claimed = self
            .inflight_entries_for(&mut conn, job.video_id.as_str())
            .await?;

        if claimed.is_empty() {
            warn!(video_id = %job.video_id, "Requeued job was not in flight");
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for raw in &claimed {
            pipe.lrem(&self.config.inflight_key, 1, raw).ignore();
        }
        if let RequeueOutcome::Requeued { .. } = outcome {
            pipe.rpush(&self.config.pending_key, serde_json::to_string(&next)?)
                .ignore();
        }
        pipe.hdel(&self.config.lease_key, job.video_id.as_str())
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        match outcome {
            RequeueOutcome::Requeued { retry_count } => {
                info!(
                    video_id = %job.video_id,
                    retry_count,
                    max_retries = job.max_retries,
                    "Requeued job"
                );
            }
            RequeueOutcome::Dropped { retry_count } => {
                warn!(
                    video_id = %job.video_id,
                    retry_count,
                    "Retry budget exhausted, dropping job"
                );
            }
        }

        Ok(outcome)
    }

    async fn release(&self, job: &ProcessingJob) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let claimed = self
            .inflight_entries_for(&mut conn, job.video_id.as_str())
            .await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for raw in &claimed {
            pipe.lrem(&self.config.inflight_key, 1, raw).ignore();
        }
        pipe.lpush(&self.config.pending_key, serde_json::to_string(job)?)
            .ignore();
        pipe.hdel(&self.config.lease_key, job.video_id.as_str())
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        info!(
            video_id = %job.video_id,
            retry_count = job.retry_count,
            "Released job back to pending"
        );
        Ok(())
    }

    async fn complete(&self, video_id: &VideoId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let claimed = self.inflight_entries_for(&mut conn, video_id.as_str()).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for raw in &claimed {
            pipe.lrem(&self.config.inflight_key, 1, raw).ignore();
        }
        pipe.hdel(&self.config.lease_key, video_id.as_str()).ignore();
        pipe.query_async::<()>(&mut conn).await?;

        debug!(video_id = %video_id, removed = claimed.len(), "Completed job");
        Ok(())
    }

    async fn size(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.llen(&self.config.pending_key).await?;
        Ok(len)
    }

    async fn touch(&self, video_id: &VideoId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .hset(
                &self.config.lease_key,
                video_id.as_str(),
                chrono::Utc::now().timestamp(),
            )
            .await?;
        Ok(())
    }

    async fn recover_stale(&self, min_idle: Duration) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let entries: Vec<String> = conn.lrange(&self.config.inflight_key, 0, -1).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let leases: HashMap<String, i64> = conn.hgetall(&self.config.lease_key).await?;
        let now = chrono::Utc::now().timestamp();
        let min_idle_secs = min_idle.as_secs() as i64;
        let mut recovered = 0;

        for raw in entries {
            let Some(video_id) = payload_video_id(&raw) else {
                warn!(payload = %raw, "Removing malformed in-flight payload");
                let _: () = conn.lrem(&self.config.inflight_key, 1, &raw).await?;
                continue;
            };

            let Some(leased_at) = leases.get(&video_id) else {
                // Claimed but never leased (worker died right after BLMOVE).
                let _: () = conn.hset(&self.config.lease_key, &video_id, now).await?;
                continue;
            };

            if now - leased_at < min_idle_secs {
                continue;
            }

            let removed: i64 = redis::Script::new(RECLAIM_SCRIPT)
                .key(&self.config.inflight_key)
                .key(&self.config.pending_key)
                .key(&self.config.lease_key)
                .arg(&raw)
                .arg(&video_id)
                .invoke_async(&mut conn)
                .await?;

            if removed > 0 {
                recovered += 1;
                warn!(
                    video_id = %video_id,
                    idle_secs = now - leased_at,
                    "Recovered stale in-flight job"
                );
            }
        }

        Ok(recovered)
    }
}
