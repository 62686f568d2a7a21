//! Object storage for processed video artifacts.
//!
//! This crate provides:
//! - The [`ObjectStorage`] capability used by the pipeline
//! - An S3-compatible backend (AWS S3, Cloudflare R2, MinIO)
//! - A local filesystem backend for development
//! - Concurrent directory uploads with rollback on failure

pub mod config;
pub mod error;
pub mod local;
pub mod s3;
pub mod storage;

use std::sync::Arc;

pub use config::{LocalConfig, S3Config, StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use s3::S3Storage;
pub use storage::{content_type_for, DirectoryUpload, ObjectStorage};

/// Build the configured backend.
pub async fn connect(config: StorageConfig) -> StorageResult<Arc<dyn ObjectStorage>> {
    Ok(match config.backend {
        StorageBackend::S3(s3) => Arc::new(
            S3Storage::new(s3)
                .await?
                .with_upload_concurrency(config.upload_concurrency),
        ),
        StorageBackend::Local(local) => {
            Arc::new(LocalStorage::new(local).with_upload_concurrency(config.upload_concurrency))
        }
    })
}
