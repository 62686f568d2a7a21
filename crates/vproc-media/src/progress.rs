//! FFmpeg progress parsing and progress reporting.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in microseconds
    pub out_time_us: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given the total duration in seconds.
    pub fn percentage(&self, total_duration_secs: f64) -> f64 {
        if self.is_complete {
            return 100.0;
        }
        if total_duration_secs <= 0.0 {
            return 0.0;
        }
        let done = self.out_time_us as f64 / 1_000_000.0;
        (done / total_duration_secs * 100.0).clamp(0.0, 100.0)
    }
}

/// Reports a 0-100 percentage for one piece of work into a slice of the
/// job's overall progress.
///
/// All sinks of a job share one channel; a single consumer turns the values
/// into status updates. Values are overall percentages already mapped through
/// every enclosing sub-range.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<f64>>,
    start: f64,
    span: f64,
}

impl ProgressSink {
    /// A sink covering the full 0-100 range.
    pub fn new(tx: mpsc::UnboundedSender<f64>) -> Self {
        Self {
            tx: Some(tx),
            start: 0.0,
            span: 100.0,
        }
    }

    /// A sink that discards everything.
    pub fn noop() -> Self {
        Self {
            tx: None,
            start: 0.0,
            span: 100.0,
        }
    }

    /// A sink for the `[from, to]` part (in local percent) of this sink.
    pub fn sub_range(&self, from: f64, to: f64) -> Self {
        let from = from.clamp(0.0, 100.0);
        let to = to.clamp(from, 100.0);
        Self {
            tx: self.tx.clone(),
            start: self.map(from),
            span: self.span * (to - from) / 100.0,
        }
    }

    /// The overall percentage for a local one.
    pub fn map(&self, percent: f64) -> f64 {
        self.start + self.span * percent.clamp(0.0, 100.0) / 100.0
    }

    /// Report local progress. Send failures (consumer gone) are ignored.
    pub fn report(&self, percent: f64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(self.map(percent));
        }
    }
}
