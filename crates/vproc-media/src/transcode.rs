//! Progressive MP4 renditions.

use std::path::Path;

use tracing::info;
use vproc_models::encoding::{DEFAULT_AUDIO_CODEC, DEFAULT_VIDEO_CODEC};
use vproc_models::{target_dimensions, QualityPreset, VideoMetadata};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::ProgressSink;

/// Encoder settings shared by every rendition.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    /// x264 speed preset
    pub preset: String,
}

/// Apply scaling and rate control for `preset` to `cmd`.
pub(crate) fn apply_rendition(
    cmd: FfmpegCommand,
    preset: &QualityPreset,
    source: &VideoMetadata,
    settings: &EncodeSettings,
) -> FfmpegCommand {
    let (width, height) = target_dimensions(preset, source.width, source.height);

    let cmd = cmd
        .scale(width, height)
        .video_codec(DEFAULT_VIDEO_CODEC)
        .preset(settings.preset.as_str())
        .video_bitrate_kbps(preset.video_bitrate)
        .output_args(["-pix_fmt", "yuv420p"]);

    if source.audio_codec.is_some() {
        cmd.audio_codec(DEFAULT_AUDIO_CODEC)
            .audio_bitrate(preset.audio_bitrate_arg())
    } else {
        cmd.output_arg("-an")
    }
}

/// Build the FFmpeg command for one MP4 rendition.
pub fn rendition_command(
    input: &Path,
    output: &Path,
    preset: &QualityPreset,
    source: &VideoMetadata,
    settings: &EncodeSettings,
) -> FfmpegCommand {
    apply_rendition(FfmpegCommand::new(input, output), preset, source, settings)
        .output_args(["-movflags", "+faststart"])
}

/// Encode `input` to `output` at `preset`, reporting 0-100 to `progress`.
pub async fn transcode_to_quality(
    runner: &FfmpegRunner,
    input: &Path,
    output: &Path,
    preset: &QualityPreset,
    source: &VideoMetadata,
    settings: &EncodeSettings,
    progress: &ProgressSink,
) -> MediaResult<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = rendition_command(input, output, preset, source, settings);
    let duration = source.duration;
    let sink = progress.clone();

    progress.report(0.0);
    runner
        .run_with_progress(&cmd, move |p| sink.report(p.percentage(duration)))
        .await?;
    progress.report(100.0);

    info!(preset = %preset.name, output = %output.display(), "Rendition encoded");
    Ok(())
}
