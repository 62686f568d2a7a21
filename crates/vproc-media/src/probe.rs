//! FFprobe metadata extraction.

use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

use vproc_models::{aspect_ratio_label, VideoMetadata};

use crate::command::{check_binary, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    bit_rate: Option<String>,
    channels: Option<u32>,
    duration: Option<String>,
}

impl FfprobeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }
}

/// Probe a video file with `ffprobe` at `ffprobe_path`.
///
/// The probe runs under `runner`'s cancellation signal and timeout.
pub async fn probe_video(
    runner: &FfmpegRunner,
    ffprobe_path: &Path,
    path: impl AsRef<Path>,
) -> MediaResult<VideoMetadata> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_binary(ffprobe_path)
        .map_err(|_| MediaError::FfprobeNotFound(ffprobe_path.to_path_buf()))?;

    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_os_string());

    let output = runner.capture(&ffprobe, &args).await?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            format!("FFprobe exited with {}", output.status),
            Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        ));
    }

    let file_size = tokio::fs::metadata(path).await?.len();
    let metadata = parse_probe_output(&output.stdout, file_size)
        .map_err(|e| match e {
            MediaError::NoVideoStream(_) => MediaError::NoVideoStream(path.to_path_buf()),
            other => other,
        })?;

    debug!(
        path = %path.display(),
        duration = metadata.duration,
        resolution = %metadata.resolution(),
        codec = %metadata.video_codec,
        "Probed video"
    );

    Ok(metadata)
}

/// Build [`VideoMetadata`] from `ffprobe -print_format json` output.
///
/// `file_size` is used when the container does not report a size.
pub fn parse_probe_output(stdout: &[u8], file_size: u64) -> MediaResult<VideoMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.is("video"))
        .ok_or_else(|| MediaError::NoVideoStream(Default::default()))?;
    let audio = probe.streams.iter().find(|s| s.is("audio"));

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidVideo(
            "video stream has no dimensions".to_string(),
        ));
    }

    let duration = parse_number::<f64>(&probe.format.duration)
        .or_else(|| parse_number(&video.duration))
        .unwrap_or(0.0);

    let container_bitrate = parse_number::<u64>(&probe.format.bit_rate).unwrap_or(0);
    let audio_bitrate = audio
        .and_then(|a| parse_number::<u64>(&a.bit_rate))
        .unwrap_or(0);
    // Some containers (e.g. MKV, WebM) only report the overall bitrate.
    let video_bitrate = parse_number::<u64>(&video.bit_rate)
        .unwrap_or_else(|| container_bitrate.saturating_sub(audio_bitrate));

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        duration,
        width,
        height,
        aspect_ratio: aspect_ratio_label(width, height),
        frame_rate,
        video_codec: video.codec_name.clone().unwrap_or_default(),
        video_bitrate,
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        audio_bitrate,
        audio_channels: audio.and_then(|a| a.channels).unwrap_or(0),
        file_size: parse_number::<u64>(&probe.format.size).unwrap_or(file_size),
    })
}

fn parse_number<T: std::str::FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0).then(|| num / den);
    }
    s.parse().ok()
}
