//! Shared data models for the video processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Processing jobs and their options (the queue message schema)
//! - Quality presets and the resolution policy applied to them
//! - Probed video metadata and processing results
//! - Encoding defaults shared by the media engine and the worker

pub mod encoding;
pub mod job;
pub mod result;
pub mod video;

// Re-export common types
pub use encoding::{even_floor, preset_fits_source, target_dimensions};
pub use job::{ProcessingJob, ProcessingOptions, QualityPreset};
pub use result::{ProcessingResult, QualityVariantResult};
pub use video::{aspect_ratio_label, ProcessingStatus, VideoId, VideoMetadata};
