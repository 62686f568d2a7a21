//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Independent dequeue-process loops in this process
    pub concurrency: usize,
    /// Parent of the per-job working directories
    pub work_dir: PathBuf,
    /// Upper bound for downloading one source file
    pub download_timeout: Duration,
    /// How long one dequeue call blocks
    pub dequeue_timeout: Duration,
    /// How often the worker sweeps in-flight jobs for crashed owners
    pub claim_interval: Duration,
    /// Lease age after which an in-flight job is considered abandoned
    pub claim_min_idle: Duration,
    /// Lease refresh interval while a job runs
    pub job_heartbeat_interval: Duration,
    /// Grace period for in-flight jobs after a shutdown signal
    pub shutdown_timeout: Duration,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            work_dir: std::env::temp_dir().join("vproc"),
            download_timeout: Duration::from_secs(30 * 60),
            dequeue_timeout: Duration::from_secs(5),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            job_heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key)
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse::<usize>("WORKER_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            download_timeout: env_secs("WORKER_DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout),
            dequeue_timeout: env_secs("QUEUE_DEQUEUE_TIMEOUT_SECS", defaults.dequeue_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", defaults.claim_min_idle),
            job_heartbeat_interval: env_secs(
                "WORKER_JOB_HEARTBEAT_SECS",
                defaults.job_heartbeat_interval,
            ),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout),
            metrics_port: env_parse("METRICS_PORT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("WORKER_CONCURRENCY", "4");
        std::env::set_var("WORKER_DOWNLOAD_TIMEOUT_SECS", "60");
        std::env::set_var("METRICS_PORT", "9100");

        let config = WorkerConfig::from_env();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.download_timeout, Duration::from_secs(60));
        assert_eq!(config.metrics_port, Some(9100));

        std::env::remove_var("WORKER_CONCURRENCY");
        std::env::remove_var("WORKER_DOWNLOAD_TIMEOUT_SECS");
        std::env::remove_var("METRICS_PORT");
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        std::env::set_var("WORKER_CONCURRENCY", "0");
        std::env::set_var("WORKER_CLAIM_INTERVAL_SECS", "soon");

        let config = WorkerConfig::from_env();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.claim_interval, Duration::from_secs(30));
        assert_eq!(config.download_timeout, Duration::from_secs(1800));

        std::env::remove_var("WORKER_CONCURRENCY");
        std::env::remove_var("WORKER_CLAIM_INTERVAL_SECS");
    }
}
