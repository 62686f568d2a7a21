//! Job queue for video processing.
//!
//! This crate provides:
//! - The [`JobQueue`] capability used by workers
//! - A Redis implementation built on a pending list and an in-flight list
//! - An in-memory implementation for tests and local development

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobQueue;
pub use queue::{JobQueue, QueueConfig, RequeueOutcome};
pub use redis_queue::RedisJobQueue;
