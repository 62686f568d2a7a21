//! Tracing setup and structured job logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_models::ProcessingJob;

/// Install the global subscriber.
///
/// `RUST_LOG` controls filtering (default `info`); `LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(env_filter)
            .init();
    }
}

/// Lifecycle logging for one job attempt with consistent fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
    user_id: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job: &ProcessingJob) -> Self {
        Self {
            video_id: job.video_id.to_string(),
            user_id: job.user_id.clone(),
            attempt: job.retry_count + 1,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(video_id = %self.video_id, attempt = self.attempt, "Job started: {}", message);
    }

    pub fn log_stage(&self, stage: &str, progress: u32) {
        info!(video_id = %self.video_id, attempt = self.attempt, stage, progress, "Job stage");
    }

    pub fn log_warning(&self, message: &str) {
        warn!(video_id = %self.video_id, attempt = self.attempt, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(video_id = %self.video_id, attempt = self.attempt, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(video_id = %self.video_id, attempt = self.attempt, "Job completed: {}", message);
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span wrapping the whole attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            video_id = %self.video_id,
            user_id = %self.user_id,
            attempt = self.attempt
        )
    }
}
