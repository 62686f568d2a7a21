//! Pipeline outputs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::video::VideoMetadata;

/// One produced rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityVariantResult {
    /// Preset name (e.g. "720p")
    pub quality: String,
    /// Public URL of the rendition
    pub url: String,
    /// Size of the encoded file in bytes
    pub file_size: u64,
    /// Target video bitrate in bits/second
    pub bitrate: u64,
    /// Codec name
    pub codec: String,
}

/// Terminal output of one job attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
    #[serde(default)]
    pub quality_variants: Vec<QualityVariantResult>,
    #[serde(default)]
    pub thumbnail_urls: Vec<String>,
    /// HLS master manifest URL, or the highest-bitrate variant without HLS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_url: Option<String>,
    /// Wall-clock processing time in milliseconds
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    /// URL of the variant with the highest bitrate, if any.
    pub fn highest_bitrate_variant_url(&self) -> Option<&str> {
        self.quality_variants
            .iter()
            .max_by_key(|v| v.bitrate)
            .map(|v| v.url.as_str())
    }
}
