//! Encoding defaults and the resolution policy for quality presets.

use crate::job::QualityPreset;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Codec name reported for renditions encoded with the default codec
pub const DEFAULT_VIDEO_CODEC_LABEL: &str = "h264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";

/// Thumbnail generation settings
pub const THUMBNAIL_SCALE_WIDTH: u32 = 320;
/// Seconds skipped at both ends of the video when picking thumbnail frames.
pub const THUMBNAIL_EDGE_MARGIN_SECS: f64 = 5.0;

/// Target HLS segment length in seconds
pub const HLS_SEGMENT_SECONDS: u32 = 6;
/// Name of the top-level adaptive manifest
pub const HLS_MASTER_PLAYLIST: &str = "master.m3u8";
/// Name of each rendition's playlist
pub const HLS_VARIANT_PLAYLIST: &str = "playlist.m3u8";

/// Round a dimension down to the nearest even integer.
///
/// H.264 with 4:2:0 chroma subsampling rejects odd frame sizes.
pub fn even_floor(value: u32) -> u32 {
    value - (value % 2)
}

/// True if the preset would not upscale the source.
pub fn preset_fits_source(preset: &QualityPreset, source_width: u32) -> bool {
    preset.width <= source_width
}

/// Output dimensions for a preset: never larger than the source, always even.
pub fn target_dimensions(preset: &QualityPreset, source_width: u32, source_height: u32) -> (u32, u32) {
    (
        even_floor(preset.width.min(source_width)),
        even_floor(preset.height.min(source_height)),
    )
}
