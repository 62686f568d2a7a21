//! Video processing worker.
//!
//! This crate provides:
//! - The per-job pipeline: download, probe, thumbnails, renditions, upload
//! - Job executor with heartbeats, retry routing and stale job recovery
//! - Progress forwarding to the status record
//! - Graceful shutdown

pub mod config;
pub mod download;
pub mod error;
pub mod executor;
pub mod failure_tracker;
pub mod logging;
pub mod pipeline;
pub mod progress;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobOutcome};
pub use logging::{init_tracing, JobLogger};
pub use pipeline::Pipeline;
