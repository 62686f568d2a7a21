//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(PathBuf),

    #[error("FFprobe not found: {0}")]
    FfprobeNotFound(PathBuf),

    #[error("FFmpeg command failed: {message}{}", stderr_suffix(.stderr))]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}{}", stderr_suffix(.stderr))]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("No video stream found in {0}")]
    NoVideoStream(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("No preset fits a {width}x{height} source")]
    NoEligiblePresets { width: u32, height: u32 },

    #[error("Every HLS rendition failed; last error: {0}")]
    AllVariantsFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an FFprobe failure error.
    pub fn ffprobe_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::FfprobeFailed {
            message: message.into(),
            stderr,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// The source itself cannot be decoded; retrying will not help.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            MediaError::NoVideoStream(_)
                | MediaError::InvalidVideo(_)
                | MediaError::FfprobeFailed { .. }
                | MediaError::NoEligiblePresets { .. }
        )
    }
}

/// Last non-empty stderr line, usually the one naming the failure.
fn stderr_suffix(stderr: &Option<String>) -> String {
    stderr
        .as_deref()
        .and_then(|s| s.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .map(|line| format!(" ({})", line))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MediaError::NoVideoStream(PathBuf::from("a.mp4")).is_content_error());
        assert!(!MediaError::Cancelled.is_content_error());
        assert!(MediaError::Cancelled.is_cancelled());
        assert!(!MediaError::ffmpeg_failed("x", None, Some(1)).is_content_error());
    }

    #[test]
    fn test_message_names_last_stderr_line() {
        let err = MediaError::ffmpeg_failed(
            "FFmpeg exited with exit status: 1",
            Some("[h264 @ 0x1] error while decoding\nConversion failed!\n".into()),
            Some(1),
        );
        assert_eq!(
            err.to_string(),
            "FFmpeg command failed: FFmpeg exited with exit status: 1 (Conversion failed!)"
        );
        assert_eq!(
            MediaError::ffprobe_failed("bad input", None).to_string(),
            "FFprobe command failed: bad input"
        );
    }
}
