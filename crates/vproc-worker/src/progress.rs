//! Per-job progress forwarding.
//!
//! Every [`ProgressSink`] of a job feeds one channel. A single task drains
//! it and writes `Processing` status updates, so writes for a job never
//! race each other and the stored percentage never goes down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use vproc_firestore::StatusRepository;
use vproc_media::ProgressSink;
use vproc_models::{ProcessingStatus, VideoId};

/// Minimum spacing of intermediate writes. Multiples of ten always go out.
const MIN_WRITE_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the forwarding task for one job attempt.
pub struct ProgressTracker {
    sink: ProgressSink,
    task: JoinHandle<u32>,
}

impl ProgressTracker {
    /// Start forwarding. `initial` is the percentage already stored.
    pub fn start(status: Arc<dyn StatusRepository>, video_id: VideoId, initial: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward(status, video_id, initial, rx));
        Self {
            sink: ProgressSink::new(tx),
            task,
        }
    }

    /// The job's root sink (0-100).
    pub fn sink(&self) -> &ProgressSink {
        &self.sink
    }

    /// Stop accepting updates and wait until queued writes are done.
    ///
    /// Sub-sinks cloned from [`sink`](Self::sink) must be dropped first.
    /// Returns the last percentage written.
    pub async fn finish(self) -> u32 {
        let Self { sink, task } = self;
        drop(sink);
        task.await.unwrap_or_default()
    }
}

async fn forward(
    status: Arc<dyn StatusRepository>,
    video_id: VideoId,
    initial: u32,
    mut rx: mpsc::UnboundedReceiver<f64>,
) -> u32 {
    let mut written = initial;
    let mut last_write = Instant::now();

    while let Some(value) = rx.recv().await {
        let percent = value.clamp(0.0, 100.0).floor() as u32;
        if percent <= written {
            continue;
        }
        let milestone = percent % 10 == 0;
        if !milestone && last_write.elapsed() < MIN_WRITE_INTERVAL {
            continue;
        }

        match status
            .set_status(&video_id, ProcessingStatus::Processing, percent, None)
            .await
        {
            Ok(()) => {
                written = percent;
                last_write = Instant::now();
            }
            Err(e) => warn!(video_id = %video_id, progress = percent, error = %e, "Progress update failed"),
        }
    }

    written
}
