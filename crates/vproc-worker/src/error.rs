//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Download of {url} returned HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("Working directory error: {0}")]
    WorkDir(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] vproc_storage::StorageError),

    #[error("Status update failed: {0}")]
    Firestore(#[from] vproc_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] vproc_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vproc_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn work_dir(msg: impl Into<String>) -> Self {
        Self::WorkDir(msg.into())
    }

    /// Shutdown interrupted the job; it goes back to the queue untouched.
    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Media(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Retrying cannot help: the job or its source is bad.
    ///
    /// Covers malformed jobs, sources without a decodable video stream and
    /// source URLs the origin refuses outright (4xx other than 408/429).
    pub fn is_permanent_failure(&self) -> bool {
        match self {
            WorkerError::InvalidJob(_) => true,
            WorkerError::Media(e) => e.is_content_error(),
            WorkerError::DownloadStatus { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }

    /// Worth another attempt through the queue.
    pub fn is_retryable(&self) -> bool {
        !self.is_cancelled() && !self.is_permanent_failure()
    }
}
