//! Job executor: dequeue loops, heartbeats, outcome routing and the
//! in-flight recovery sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vproc_firestore::StatusRepository;
use vproc_models::{ProcessingJob, ProcessingResult};
use vproc_queue::{JobQueue, RequeueOutcome};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::failure_tracker::FailureTracker;
use crate::logging::JobLogger;
use crate::pipeline::Pipeline;

/// Consecutive failures of a background operation that still get logged.
const MAX_LOGGED_FAILURES: u32 = 3;
/// Pause after a failed dequeue.
const DEQUEUE_BACKOFF: Duration = Duration::from_secs(5);

/// How one attempt ended, as far as the queue is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Permanent failure, removed without retry
    Failed,
    Requeued,
    /// Retry budget exhausted
    Dropped,
    /// Interrupted by shutdown and handed back
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
            JobOutcome::Requeued => "requeued",
            JobOutcome::Dropped => "dropped",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

/// Runs the pipeline for jobs pulled from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    status: Arc<dyn StatusRepository>,
    shutdown: watch::Receiver<bool>,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<Pipeline>,
        status: Arc<dyn StatusRepository>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            queue,
            pipeline,
            status,
            shutdown,
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run the worker loops and the recovery sweep until shutdown.
    ///
    /// Returns once every loop has finished its current job.
    pub async fn run(self: Arc<Self>) {
        let concurrency = self.config.concurrency.max(1);
        info!(
            concurrency,
            claim_interval_secs = self.config.claim_interval.as_secs(),
            "Starting job executor"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&self).recovery_loop());
        for worker in 0..concurrency {
            tasks.spawn(Arc::clone(&self).worker_loop(worker));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Executor task failed");
            }
        }
        info!("Job executor stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "Worker loop started");
        let mut failures = FailureTracker::new("dequeue", MAX_LOGGED_FAILURES);
        let mut shutdown = self.shutdown.clone();

        while !self.is_shutting_down() {
            match self.process_next().await {
                Ok(_) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        error!(worker, error = %e, "Failed to dequeue job");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(DEQUEUE_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        debug!(worker, "Worker loop stopped");
    }

    async fn recovery_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut interval = tokio::time::interval(self.config.claim_interval.max(Duration::from_secs(1)));
        let mut failures = FailureTracker::new("recover_stale", MAX_LOGGED_FAILURES);

        while !self.is_shutting_down() {
            tokio::select! {
                _ = interval.tick() => self.sweep(&mut failures).await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Return stale in-flight jobs to pending and refresh the depth gauge.
    pub async fn sweep(&self, failures: &mut FailureTracker) {
        match self.queue.recover_stale(self.config.claim_min_idle).await {
            Ok(recovered) => {
                failures.record_success();
                if recovered > 0 {
                    info!(recovered, "Recovered stale in-flight jobs");
                    metrics::counter!("vproc_jobs_recovered_total").increment(recovered as u64);
                }
            }
            Err(e) => {
                if failures.record_failure() {
                    warn!(error = %e, "Recovery sweep failed");
                }
            }
        }

        if let Ok(depth) = self.queue.size().await {
            metrics::gauge!("vproc_queue_depth").set(depth as f64);
        }
    }

    /// Dequeue and run one job. Returns `false` if the queue stayed empty.
    pub async fn process_next(&self) -> WorkerResult<bool> {
        let Some(job) = self.queue.dequeue(self.config.dequeue_timeout).await? else {
            return Ok(false);
        };
        if self.is_shutting_down() {
            // Claimed while the dequeue was blocked on a stopping worker.
            self.release(&job).await;
            return Ok(false);
        }
        self.execute(job).await;
        Ok(true)
    }

    async fn execute(&self, job: ProcessingJob) -> JobOutcome {
        let logger = JobLogger::new(&job);
        let started = Instant::now();
        metrics::gauge!("vproc_jobs_in_progress").increment(1.0);

        let result = self.run_with_heartbeat(&job).await;

        metrics::gauge!("vproc_jobs_in_progress").decrement(1.0);
        let outcome = self.settle(&job, result, &logger).await;

        metrics::counter!("vproc_jobs_total", "outcome" => outcome.as_str()).increment(1);
        metrics::histogram!("vproc_job_duration_seconds", "outcome" => outcome.as_str())
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    /// Run the pipeline while refreshing the job's queue lease.
    async fn run_with_heartbeat(&self, job: &ProcessingJob) -> WorkerResult<ProcessingResult> {
        let run = self.pipeline.process(job, &self.shutdown);
        tokio::pin!(run);

        let period = self.config.job_heartbeat_interval.max(Duration::from_secs(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut failures = FailureTracker::new("heartbeat", 1);

        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = heartbeat.tick() => match self.queue.touch(&job.video_id).await {
                    Ok(()) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(video_id = %job.video_id, error = %e, "Heartbeat failed");
                        }
                    }
                },
            }
        }
    }

    /// Route a finished attempt to the queue and the status record.
    async fn settle(
        &self,
        job: &ProcessingJob,
        result: WorkerResult<ProcessingResult>,
        logger: &JobLogger,
    ) -> JobOutcome {
        let error = match result {
            Ok(_) => {
                self.complete(job).await;
                return JobOutcome::Completed;
            }
            Err(e) => e,
        };

        if error.is_cancelled() {
            info!(video_id = %job.video_id, "Job interrupted by shutdown, returning to queue");
            self.release(job).await;
            return JobOutcome::Cancelled;
        }

        self.mark_failed(job, &error).await;

        if error.is_permanent_failure() {
            logger.log_warning(&format!("permanent failure, not retrying: {}", error));
            self.complete(job).await;
            return JobOutcome::Failed;
        }

        match self.requeue(job).await {
            Some(RequeueOutcome::Requeued { retry_count }) => {
                info!(
                    video_id = %job.video_id,
                    retry_count,
                    max_retries = job.max_retries,
                    "Job requeued"
                );
                JobOutcome::Requeued
            }
            Some(RequeueOutcome::Dropped { retry_count }) => {
                error!(
                    video_id = %job.video_id,
                    retry_count,
                    error = %error,
                    "Job exhausted its retries and was dropped"
                );
                JobOutcome::Dropped
            }
            None => JobOutcome::Requeued,
        }
    }

    async fn complete(&self, job: &ProcessingJob) {
        if let Err(e) = self.queue.complete(&job.video_id).await {
            error!(video_id = %job.video_id, error = %e, "Failed to remove job from in-flight");
        }
    }

    /// `None` if the queue could not be reached; the recovery sweep will
    /// pick the job up again.
    async fn requeue(&self, job: &ProcessingJob) -> Option<RequeueOutcome> {
        match self.queue.requeue(job).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(video_id = %job.video_id, error = %e, "Failed to requeue job");
                None
            }
        }
    }

    /// Failures leave the job in flight for the recovery sweep.
    async fn release(&self, job: &ProcessingJob) {
        if let Err(e) = self.queue.release(job).await {
            error!(video_id = %job.video_id, error = %e, "Failed to release job");
        }
    }

    async fn mark_failed(&self, job: &ProcessingJob, error: &WorkerError) {
        if let Err(e) = self.status.mark_failed(&job.video_id, &error.to_string()).await {
            error!(video_id = %job.video_id, error = %e, "Failed to mark video as failed");
        }
    }
}
