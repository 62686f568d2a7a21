//! Queue capability and configuration.

use std::time::Duration;

use async_trait::async_trait;
use vproc_models::{ProcessingJob, VideoId};

use crate::error::QueueResult;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// List holding jobs waiting for a worker
    pub pending_key: String,
    /// List holding jobs claimed by a worker
    pub inflight_key: String,
    /// Hash of video ID to last lease refresh (unix seconds)
    pub lease_key: String,
    /// How long a worker blocks waiting for a job
    pub dequeue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            pending_key: "video-processing:pending".to_string(),
            inflight_key: "video-processing:inflight".to_string(),
            lease_key: "video-processing:leases".to_string(),
            dequeue_timeout: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            pending_key: std::env::var("QUEUE_PENDING_KEY").unwrap_or(defaults.pending_key),
            inflight_key: std::env::var("QUEUE_INFLIGHT_KEY").unwrap_or(defaults.inflight_key),
            lease_key: std::env::var("QUEUE_LEASE_KEY").unwrap_or(defaults.lease_key),
            dequeue_timeout: std::env::var("QUEUE_DEQUEUE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dequeue_timeout),
        }
    }
}

/// What `requeue` did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Pushed back to pending with the new retry count
    Requeued { retry_count: u32 },
    /// Retry budget used up; removed from the queue for good
    Dropped { retry_count: u32 },
}

impl RequeueOutcome {
    pub fn retry_count(&self) -> u32 {
        match self {
            RequeueOutcome::Requeued { retry_count } | RequeueOutcome::Dropped { retry_count } => {
                *retry_count
            }
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, RequeueOutcome::Dropped { .. })
    }
}

/// Reliable work queue: claimed jobs stay in an in-flight list until the
/// worker completes or requeues them.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job to the tail of the pending list.
    async fn enqueue(&self, job: &ProcessingJob) -> QueueResult<()>;

    /// Move the head of pending to in-flight, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout. Payloads that cannot be parsed are removed
    /// from in-flight and also reported as `None`.
    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<ProcessingJob>>;

    /// Record a failed attempt.
    ///
    /// Increments the retry count; the job goes back to pending while the
    /// count is below `max_retries` and is dropped otherwise. The in-flight
    /// entry is removed in both cases.
    async fn requeue(&self, job: &ProcessingJob) -> QueueResult<RequeueOutcome>;

    /// Hand an unfinished job back without counting an attempt.
    ///
    /// The in-flight entry is removed and the job goes to the head of
    /// pending with its retry count unchanged.
    async fn release(&self, job: &ProcessingJob) -> QueueResult<()>;

    /// Remove every in-flight entry for `video_id`.
    async fn complete(&self, video_id: &VideoId) -> QueueResult<()>;

    /// Approximate number of pending jobs.
    async fn size(&self) -> QueueResult<u64>;

    /// Refresh the lease of an in-flight job.
    async fn touch(&self, video_id: &VideoId) -> QueueResult<()>;

    /// Return in-flight jobs whose lease is older than `min_idle` to pending.
    ///
    /// Returns the number of jobs moved.
    async fn recover_stale(&self, min_idle: Duration) -> QueueResult<usize>;
}

/// Extract the video ID from a raw queue payload without requiring the rest
/// of the job to parse.
pub(crate) fn payload_video_id(raw: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()?
        .get("videoId")?
        .as_str()
        .map(str::to_string)
}

/// `job` after one more failed attempt, and where it should go next.
pub(crate) fn bump_retry(job: &ProcessingJob) -> (ProcessingJob, RequeueOutcome) {
    let mut next = job.clone();
    next.retry_count = job.retry_count.saturating_add(1);
    let outcome = if next.retries_exhausted() {
        RequeueOutcome::Dropped {
            retry_count: next.retry_count,
        }
    } else {
        RequeueOutcome::Requeued {
            retry_count: next.retry_count,
        }
    };
    (next, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_retry_drops_at_budget() {
        let job = ProcessingJob::new("v", "u", "https://x/y.mp4", "y.mp4").with_max_retries(2);
        let (next, outcome) = bump_retry(&job);
        assert_eq!(outcome, RequeueOutcome::Requeued { retry_count: 1 });

        let (_, outcome) = bump_retry(&next);
        assert_eq!(outcome, RequeueOutcome::Dropped { retry_count: 2 });
    }

    #[test]
    fn test_payload_video_id() {
        assert_eq!(
            payload_video_id(r#"{"videoId":"abc","userId":5}"#).as_deref(),
            Some("abc")
        );
        assert_eq!(payload_video_id("not json"), None);
    }
}
