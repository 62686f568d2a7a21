//! In-process job queue.
//!
//! Mirrors the Redis list layout (serialized payloads in a pending and an
//! in-flight list plus a lease table) so behaviour under tests matches
//! production, including malformed payload handling.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use vproc_models::{ProcessingJob, VideoId};

use crate::error::QueueResult;
use crate::queue::{bump_retry, payload_video_id, JobQueue, RequeueOutcome};

#[derive(Default)]
struct State {
    pending: VecDeque<String>,
    inflight: Vec<String>,
    leases: HashMap<String, Instant>,
}

impl State {
    fn remove_inflight(&mut self, video_id: &str) -> usize {
        let before = self.inflight.len();
        self.inflight
            .retain(|raw| payload_video_id(raw).as_deref() != Some(video_id));
        self.leases.remove(video_id);
        before - self.inflight.len()
    }
}

/// Job queue held in memory.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
    available: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an arbitrary payload to pending.
    pub async fn push_raw(&self, payload: impl Into<String>) {
        self.state.lock().await.pending.push_back(payload.into());
        self.available.notify_one();
    }

    /// Parsed pending jobs, head first.
    pub async fn pending_jobs(&self) -> Vec<ProcessingJob> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub async fn inflight_len(&self) -> usize {
        self.state.lock().await.inflight.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ProcessingJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        self.push_raw(payload).await;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<ProcessingJob>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(raw) = state.pending.pop_front() {
                    return match serde_json::from_str::<ProcessingJob>(&raw) {
                        Ok(job) => {
                            state.inflight.push(raw);
                            state
                                .leases
                                .insert(job.video_id.as_str().to_string(), Instant::now());
                            Ok(Some(job))
                        }
                        Err(e) => {
                            warn!(error = %e, payload = %raw, "Removing malformed job payload");
                            Ok(None)
                        }
                    };
                }
            }

            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn requeue(&self, job: &ProcessingJob) -> QueueResult<RequeueOutcome> {
        let (next, outcome) = bump_retry(job);
        let payload = serde_json::to_string(&next)?;

        let mut state = self.state.lock().await;
        state.remove_inflight(job.video_id.as_str());
        if let RequeueOutcome::Requeued { .. } = outcome {
            state.pending.push_back(payload);
            self.available.notify_one();
        }
        debug!(video_id = %job.video_id, ?outcome, "Requeue");
        Ok(outcome)
    }

    async fn release(&self, job: &ProcessingJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;

        let mut state = self.state.lock().await;
        state.remove_inflight(job.video_id.as_str());
        state.pending.push_front(payload);
        self.available.notify_one();
        debug!(video_id = %job.video_id, retry_count = job.retry_count, "Released job");
        Ok(())
    }

    async fn complete(&self, video_id: &VideoId) -> QueueResult<()> {
        self.state.lock().await.remove_inflight(video_id.as_str());
        Ok(())
    }

    async fn size(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn touch(&self, video_id: &VideoId) -> QueueResult<()> {
        self.state
            .lock()
            .await
            .leases
            .insert(video_id.as_str().to_string(), Instant::now());
        Ok(())
    }

    async fn recover_stale(&self, min_idle: Duration) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let entries = std::mem::take(&mut state.inflight);
        let mut recovered = 0;

        for raw in entries {
            let Some(video_id) = payload_video_id(&raw) else {
                warn!(payload = %raw, "Removing malformed in-flight payload");
                continue;
            };
            match state.leases.get(&video_id).copied() {
                Some(leased_at) if now.duration_since(leased_at) >= min_idle => {
                    state.leases.remove(&video_id);
                    state.pending.push_back(raw);
                    recovered += 1;
                }
                Some(_) => state.inflight.push(raw),
                None => {
                    state.leases.insert(video_id, now);
                    state.inflight.push(raw);
                }
            }
        }

        for _ in 0..recovered {
            self.available.notify_one();
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, max_retries: u32) -> ProcessingJob {
        ProcessingJob::new(id, "user", "https://example.com/in.mp4", "in.mp4")
            .with_max_retries(max_retries)
    }

    #[tokio::test]
    async fn test_dequeue_moves_to_inflight() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(&job("a", 3)).await.unwrap();
        queue.enqueue(&job("b", 3)).await.unwrap();

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.video_id.as_str(), "a");
        assert_eq!(queue.size().await.unwrap(), 1);
        assert_eq!(queue.inflight_len().await, 1);

        queue.complete(&first.video_id).await.unwrap();
        assert_eq!(queue.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryJobQueue::new();
        let got = queue.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryJobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(&job("late", 3)).await.unwrap();

        let got = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(got.video_id.as_str(), "late");
    }

    #[tokio::test]
    async fn test_requeue_until_dropped_leaves_nothing() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(&job("v", 3)).await.unwrap();

        let mut seen = Vec::new();
        loop {
            let Some(claimed) = queue.dequeue(Duration::from_millis(10)).await.unwrap() else {
                break;
            };
            let outcome = queue.requeue(&claimed).await.unwrap();
            seen.push(outcome);
        }

        assert_eq!(
            seen,
            vec![
                RequeueOutcome::Requeued { retry_count: 1 },
                RequeueOutcome::Requeued { retry_count: 2 },
                RequeueOutcome::Dropped { retry_count: 3 },
            ]
        );
        assert_eq!(queue.size().await.unwrap(), 0);
        assert_eq!(queue.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn test_release_keeps_retry_count_and_position() {
        let queue = MemoryJobQueue::new();
        let mut last_try = job("last", 3);
        last_try.retry_count = 2;
        queue.enqueue(&last_try).await.unwrap();
        queue.enqueue(&job("other", 3)).await.unwrap();

        let claimed = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        queue.release(&claimed).await.unwrap();

        assert_eq!(queue.inflight_len().await, 0);
        let pending = queue.pending_jobs().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].video_id.as_str(), "last");
        assert_eq!(pending[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_complete_ignores_unrelated_entries() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(&job("a", 3)).await.unwrap();
        queue.enqueue(&job("b", 3)).await.unwrap();
        let a = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        let _b = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        queue.complete(&a.video_id).await.unwrap();
        queue.complete(&VideoId::from("missing")).await.unwrap();
        assert_eq!(queue.inflight_len().await, 1);
    }

    #[tokio::test]
    async fn test_crashed_worker_job_is_recovered() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(&job("crash", 3)).await.unwrap();

        // Claimed, then the worker disappears without completing or requeueing.
        let claimed = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(queue.size().await.unwrap(), 0);

        assert_eq!(queue.recover_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.recover_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(queue.inflight_len().await, 0);

        let again = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.video_id, claimed.video_id);
        assert_eq!(again.retry_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded() {
        let queue = MemoryJobQueue::new();
        queue.push_raw("{not json").await;
        queue.enqueue(&job("ok", 3)).await.unwrap();

        assert!(queue.dequeue(Duration::from_millis(10)).await.unwrap().is_none());
        assert_eq!(queue.inflight_len().await, 0);

        let next = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(next.video_id.as_str(), "ok");
    }
}
