//! Video identity, status and probed metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a video document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status persisted on the video document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum ProcessingStatus {
    /// Upload finished, job queued
    #[default]
    Uploaded,
    /// A worker is running the pipeline
    Processing,
    /// All artifacts are available
    Ready,
    /// Processing failed; see `processingError`
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Uploaded => "Uploaded",
            ProcessingStatus::Processing => "Processing",
            ProcessingStatus::Ready => "Ready",
            ProcessingStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Facts probed from the source file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Display aspect ratio label (e.g. "16:9")
    pub aspect_ratio: String,
    /// Frames per second
    pub frame_rate: f64,
    /// Video codec name as reported by the prober
    pub video_codec: String,
    /// Video bitrate in bits/second
    pub video_bitrate: u64,
    /// Audio codec name, if the file has audio
    pub audio_codec: Option<String>,
    /// Audio bitrate in bits/second
    pub audio_bitrate: u64,
    /// Number of audio channels
    pub audio_channels: u32,
    /// File size in bytes
    pub file_size: u64,
}

impl VideoMetadata {
    /// Resolution label, e.g. "1920x1080".
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Canonical labels for common ratios, matched within 1%.
const KNOWN_RATIOS: &[(f64, &str)] = &[
    (16.0 / 9.0, "16:9"),
    (4.0 / 3.0, "4:3"),
    (1.0, "1:1"),
    (9.0 / 16.0, "9:16"),
    (21.0 / 9.0, "21:9"),
];

/// Aspect ratio label for a frame size.
///
/// The size is reduced by its greatest common divisor first; an exact or
/// near match to a common ratio yields the canonical label (so 2560x1080,
/// which reduces to 64:27, is reported as "21:9"), anything else the reduced
/// ratio itself.
pub fn aspect_ratio_label(width: u32, height: u32) -> String {
    if width == 0 || height == 0 {
        return "unknown".to_string();
    }

    let divisor = gcd(width, height);
    let (w, h) = (width / divisor, height / divisor);
    let ratio = w as f64 / h as f64;

    for (known, label) in KNOWN_RATIOS {
        if ((ratio - known) / known).abs() < 0.01 {
            return label.to_string();
        }
    }

    format!("{}:{}", w, h)
}
