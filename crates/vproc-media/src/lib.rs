//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2` and per-job progress sinks
//! - Cancellation support via tokio watch channels
//! - Metadata probing, MP4 renditions, HLS sets and thumbnails behind the
//!   [`TranscodingEngine`] trait

pub mod command;
pub mod engine;
pub mod error;
pub mod hls;
pub mod probe;
pub mod progress;
pub mod thumbnail;
pub mod transcode;

#[cfg(all(test, unix))]
mod testing;

pub use command::{FfmpegCommand, FfmpegRunner};
pub use engine::{EngineConfig, FfmpegEngine, TranscodingEngine};
pub use error::{MediaError, MediaResult};
pub use hls::{master_playlist, HlsVariant};
pub use probe::{parse_probe_output, probe_video};
pub use progress::{FfmpegProgress, ProgressSink};
pub use thumbnail::{thumbnail_file_name, thumbnail_timestamps};
