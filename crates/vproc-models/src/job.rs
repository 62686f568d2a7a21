//! Job definitions for queue processing.
//!
//! The JSON shape of [`ProcessingJob`] is the queue message contract shared
//! with the upload API that produces jobs, so field names are camelCase.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::video::VideoId;

/// Default retry budget for a job that does not carry one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default number of thumbnails per video.
pub const DEFAULT_THUMBNAIL_COUNT: u32 = 5;
/// Upper bound accepted for `thumbnailCount`.
pub const MAX_THUMBNAIL_COUNT: u32 = 50;

/// A named rendition target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityPreset {
    /// Preset name, used as file and directory name (e.g. "720p")
    pub name: String,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Target video bitrate in kbps
    #[serde(deserialize_with = "deserialize_kbps")]
    pub video_bitrate: u32,
    /// Target audio bitrate in kbps
    #[serde(deserialize_with = "deserialize_kbps")]
    pub audio_bitrate: u32,
}

impl QualityPreset {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        video_bitrate: u32,
        audio_bitrate: u32,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            video_bitrate,
            audio_bitrate,
        }
    }

    /// The standard ladder used when a job does not list presets.
    pub fn standard_ladder() -> Vec<Self> {
        vec![
            Self::new("1080p", 1920, 1080, 5000, 192),
            Self::new("720p", 1280, 720, 2500, 128),
            Self::new("480p", 854, 480, 1000, 96),
            Self::new("360p", 640, 360, 600, 64),
        ]
    }

    /// Peak bandwidth advertised in an HLS master playlist, in bits/second.
    pub fn bandwidth(&self) -> u64 {
        (self.video_bitrate as u64 + self.audio_bitrate as u64) * 1000
    }

    /// FFmpeg bitrate argument for the video stream (e.g. "2500k").
    pub fn video_bitrate_arg(&self) -> String {
        format!("{}k", self.video_bitrate)
    }

    /// FFmpeg bitrate argument for the audio stream (e.g. "128k").
    pub fn audio_bitrate_arg(&self) -> String {
        format!("{}k", self.audio_bitrate)
    }
}

/// Accepts `2500`, `"2500"`, `"2500k"` or `"2.5M"`.
fn deserialize_kbps<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_kbps(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid bitrate: {}", s))),
    }
}

fn parse_kbps(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(v) = s.strip_suffix(|c: char| c == 'k' || c == 'K') {
        return v.trim().parse().ok();
    }
    if let Some(v) = s.strip_suffix(|c: char| c == 'm' || c == 'M') {
        let mbps: f64 = v.trim().parse().ok()?;
        return Some((mbps * 1000.0).round() as u32);
    }
    s.parse().ok()
}

/// Desired outputs for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Build an HLS segment set with a master manifest
    #[serde(rename = "generateHLS", default = "default_true")]
    pub generate_hls: bool,
    /// Build one progressive MP4 per preset
    #[serde(default = "default_true")]
    pub generate_quality_variants: bool,
    /// Ordered rendition targets
    #[serde(default = "QualityPreset::standard_ladder")]
    pub quality_presets: Vec<QualityPreset>,
    /// Number of thumbnails to extract
    #[serde(default = "default_thumbnail_count")]
    pub thumbnail_count: u32,
}

fn default_true() -> bool {
    true
}

fn default_thumbnail_count() -> u32 {
    DEFAULT_THUMBNAIL_COUNT
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            generate_hls: true,
            generate_quality_variants: true,
            quality_presets: QualityPreset::standard_ladder(),
            thumbnail_count: DEFAULT_THUMBNAIL_COUNT,
        }
    }
}

/// One unit of work: transcode one uploaded video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    /// Video document ID
    pub video_id: VideoId,
    /// Owning user ID
    pub user_id: String,
    /// URL the source file is downloaded from
    pub source_url: String,
    /// Filename as uploaded by the user
    #[serde(default)]
    pub original_file_name: String,
    /// Requested outputs
    #[serde(default)]
    pub options: ProcessingOptions,
    /// Number of failed attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Attempts allowed before the job is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ProcessingJob {
    /// Create a new job with default options.
    pub fn new(
        video_id: impl Into<VideoId>,
        user_id: impl Into<String>,
        source_url: impl Into<String>,
        original_file_name: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            user_id: user_id.into(),
            source_url: source_url.into(),
            original_file_name: original_file_name.into(),
            options: ProcessingOptions::default(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set processing options.
    pub fn with_options(mut self, options: ProcessingOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// True once the retry budget is used up.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Object storage prefix for every artifact of this job.
    pub fn storage_prefix(&self) -> String {
        format!("videos/{}/{}", self.user_id, self.video_id)
    }

    /// File extension of the uploaded source, lowercased, if it has one.
    pub fn source_extension(&self) -> Option<String> {
        std::path::Path::new(&self.original_file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| e.to_ascii_lowercase())
    }

    /// Validate the job before any work is attempted.
    pub fn validate(&self) -> Result<(), String> {
        if self.video_id.as_str().trim().is_empty() {
            return Err("videoId is required".to_string());
        }
        if self.user_id.trim().is_empty() {
            return Err("userId is required".to_string());
        }
        match url::Url::parse(&self.source_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => return Err(format!("unsupported source URL scheme: {}", u.scheme())),
            Err(e) => return Err(format!("invalid source URL: {}", e)),
        }
        if self.options.thumbnail_count > MAX_THUMBNAIL_COUNT {
            return Err(format!(
                "thumbnailCount {} exceeds maximum of {}",
                self.options.thumbnail_count, MAX_THUMBNAIL_COUNT
            ));
        }
        let mut names = std::collections::HashSet::new();
        for preset in &self.options.quality_presets {
            if preset.width == 0 || preset.height == 0 {
                return Err(format!("preset {} has a zero dimension", preset.name));
            }
            if preset.name.is_empty()
                || !preset
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(format!("invalid preset name: {:?}", preset.name));
            }
            if !names.insert(preset.name.as_str()) {
                return Err(format!("duplicate preset name: {}", preset.name));
            }
        }
        Ok(())
    }
}
