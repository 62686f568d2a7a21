//! Log suppression for background loops that fail repeatedly.

use tracing::{info, warn};

/// Counts consecutive failures of one recurring operation.
///
/// The first `max_logged` failures in a row are reported; after that the
/// loop goes quiet until the next success.
#[derive(Debug)]
pub struct FailureTracker {
    operation: &'static str,
    consecutive: u32,
    max_logged: u32,
}

impl FailureTracker {
    pub fn new(operation: &'static str, max_logged: u32) -> Self {
        Self {
            operation,
            consecutive: 0,
            max_logged,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.max_logged {
            info!(
                operation = self.operation,
                failures = self.consecutive,
                "Recovered after repeated failures"
            );
        }
        self.consecutive = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive == self.max_logged + 1 {
            warn!(
                operation = self.operation,
                failures = self.consecutive,
                "Suppressing further failure logs until the next success"
            );
        }
        self.consecutive <= self.max_logged
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}
