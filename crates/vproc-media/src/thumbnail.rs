//! Thumbnail generation.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vproc_models::encoding::THUMBNAIL_EDGE_MARGIN_SECS;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Evenly spaced timestamps for `count` thumbnails.
///
/// The window `[margin, duration - margin]` is cut into `count + 1` equal
/// intervals and a frame is taken at each inner boundary, so no frame lands
/// on either edge. When the window is shorter than a second every timestamp
/// sits at the middle of the video.
pub fn thumbnail_timestamps(count: u32, duration: f64) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }

    let duration = duration.max(0.0);
    let start = THUMBNAIL_EDGE_MARGIN_SECS;
    let end = duration - THUMBNAIL_EDGE_MARGIN_SECS;

    if end - start < 1.0 {
        return vec![duration / 2.0; count as usize];
    }

    let step = (end - start) / (count + 1) as f64;
    (1..=count).map(|i| start + step * i as f64).collect()
}

/// File name of the `n`th thumbnail (1-based).
pub fn thumbnail_file_name(n: usize) -> String {
    format!("thumbnail_{}.jpg", n)
}

/// Extract one JPEG frame at `timestamp`, scaled to `width` keeping aspect.
pub async fn generate_thumbnail(
    runner: &FfmpegRunner,
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    timestamp: f64,
    width: u32,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(video_path.as_ref(), output_path.as_ref())
        .seek(timestamp)
        .single_frame()
        .video_filter(format!("scale={}:-2", width))
        .output_args(["-q:v", "2"]);

    runner.run(&cmd).await
}

/// Extract `count` thumbnails into `output_dir`.
///
/// Frames that fail to extract are skipped; only cancellation aborts.
pub async fn generate_thumbnails(
    runner: &FfmpegRunner,
    video_path: &Path,
    output_dir: &Path,
    count: u32,
    duration: f64,
    width: u32,
) -> MediaResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let mut paths = Vec::new();
    for (i, timestamp) in thumbnail_timestamps(count, duration).into_iter().enumerate() {
        let output = output_dir.join(thumbnail_file_name(i + 1));
        match generate_thumbnail(runner, video_path, &output, timestamp, width).await {
            Ok(()) if output.exists() => {
                debug!(timestamp, path = %output.display(), "Generated thumbnail");
                paths.push(output);
            }
            Ok(()) => {
                warn!(timestamp, "FFmpeg produced no thumbnail frame, skipping");
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(timestamp, error = %e, "Thumbnail extraction failed, skipping");
            }
        }
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_evenly_spaced_within_margins() {
        let ts = thumbnail_timestamps(5, 100.0);
        assert_eq!(ts.len(), 5);
        assert!(ts.iter().all(|t| *t > 5.0 && *t < 95.0));
        assert!((ts[0] - 20.0).abs() < 1e-9);
        assert!((ts[4] - 80.0).abs() < 1e-9);

        let gaps: Vec<f64> = ts.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.iter().all(|g| (g - gaps[0]).abs() < 1e-9));
    }

    #[test]
    fn test_two_frames_stay_off_the_edges() {
        let ts = thumbnail_timestamps(2, 17.0);
        assert_eq!(ts.len(), 2);
        assert!(ts.iter().all(|t| *t > 5.0 && *t < 12.0));
    }

    #[test]
    fn test_short_video_clusters_at_midpoint() {
        let ts = thumbnail_timestamps(3, 8.0);
        assert_eq!(ts, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_single_and_zero_counts() {
        assert_eq!(thumbnail_timestamps(1, 100.0), vec![50.0]);
        assert!(thumbnail_timestamps(0, 100.0).is_empty());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(thumbnail_file_name(1), "thumbnail_1.jpg");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_frame_is_skipped() {
        use crate::testing::{fake_binary, LAST_ARG};

        let dir = tempfile::tempdir().unwrap();
        // Seeking to the middle frame (50s of 100s) fails; the others succeed.
        let body = format!(
            "{}\ncase \"$*\" in *\"-ss 50.000\"*) echo 'seek failed' >&2; exit 1;; esac\necho jpg > \"$out\"",
            LAST_ARG
        );
        let ffmpeg = fake_binary(dir.path(), "ffmpeg", &body);
        let runner = FfmpegRunner::new(ffmpeg);
        let out_dir = dir.path().join("thumbs");

        let paths = generate_thumbnails(&runner, Path::new("in.mp4"), &out_dir, 3, 100.0, 320)
            .await
            .unwrap();

        assert_eq!(
            paths,
            vec![out_dir.join(thumbnail_file_name(1)), out_dir.join(thumbnail_file_name(3))]
        );
        assert!(!out_dir.join(thumbnail_file_name(2)).exists());
    }
}
