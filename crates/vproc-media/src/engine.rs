//! The transcoding engine capability and its FFmpeg implementation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use vproc_models::encoding::{DEFAULT_PRESET, HLS_SEGMENT_SECONDS, THUMBNAIL_SCALE_WIDTH};
use vproc_models::{preset_fits_source, QualityPreset, VideoMetadata};

use crate::command::{check_binary, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::hls::{hls_variant_command, variant_dir, write_master_playlist, HlsVariant};
use crate::probe::probe_video;
use crate::progress::ProgressSink;
use crate::thumbnail::generate_thumbnails;
use crate::transcode::{transcode_to_quality, EncodeSettings};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// FFmpeg binary (name looked up in PATH, or a path)
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary
    pub ffprobe_path: PathBuf,
    /// Parent directory for per-job working directories
    pub work_dir: PathBuf,
    /// Thumbnail width in pixels
    pub thumbnail_width: u32,
    /// Target HLS segment length
    pub hls_segment_seconds: u32,
    /// x264 speed preset
    pub encoder_preset: String,
    /// Upper bound for a single FFmpeg invocation
    pub ffmpeg_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            work_dir: std::env::temp_dir().join("vproc"),
            thumbnail_width: THUMBNAIL_SCALE_WIDTH,
            hls_segment_seconds: HLS_SEGMENT_SECONDS,
            encoder_preset: DEFAULT_PRESET.to_string(),
            ffmpeg_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            thumbnail_width: std::env::var("THUMBNAIL_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|w| *w > 0)
                .unwrap_or(defaults.thumbnail_width),
            hls_segment_seconds: std::env::var("HLS_SEGMENT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.hls_segment_seconds),
            encoder_preset: std::env::var("FFMPEG_PRESET").unwrap_or(defaults.encoder_preset),
            ffmpeg_timeout: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Media operations the pipeline needs.
#[async_trait]
pub trait TranscodingEngine: Send + Sync {
    /// Probe the source file.
    async fn extract_metadata(&self, path: &Path) -> MediaResult<VideoMetadata>;

    /// Encode one progressive MP4 rendition; returns `output`.
    async fn transcode_to_quality(
        &self,
        input: &Path,
        output: &Path,
        preset: &QualityPreset,
        source: &VideoMetadata,
        progress: ProgressSink,
    ) -> MediaResult<PathBuf>;

    /// Encode an HLS rendition per eligible preset plus a master playlist;
    /// returns the master playlist path.
    async fn generate_adaptive_set(
        &self,
        input: &Path,
        output_dir: &Path,
        presets: &[QualityPreset],
        source: &VideoMetadata,
        progress: ProgressSink,
    ) -> MediaResult<PathBuf>;

    /// Extract evenly spaced thumbnails.
    async fn generate_thumbnails(
        &self,
        input: &Path,
        output_dir: &Path,
        count: u32,
        duration: f64,
    ) -> MediaResult<Vec<PathBuf>>;
}

/// [`TranscodingEngine`] backed by the FFmpeg and FFprobe command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    config: EngineConfig,
    runner: FfmpegRunner,
}

impl FfmpegEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut runner = FfmpegRunner::new(config.ffmpeg_path.clone());
        if let Some(timeout) = config.ffmpeg_timeout {
            runner = runner.with_timeout(timeout);
        }
        Self { config, runner }
    }

    /// Kill running encodes when `cancel_rx` turns true.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.runner = self.runner.with_cancel(cancel_rx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Verify both binaries resolve.
    pub fn check_binaries(&self) -> MediaResult<()> {
        check_binary(&self.config.ffmpeg_path)
            .map_err(|_| MediaError::FfmpegNotFound(self.config.ffmpeg_path.clone()))?;
        check_binary(&self.config.ffprobe_path)
            .map_err(|_| MediaError::FfprobeNotFound(self.config.ffprobe_path.clone()))?;
        Ok(())
    }

    fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            preset: self.config.encoder_preset.clone(),
        }
    }
}

#[async_trait]
impl TranscodingEngine for FfmpegEngine {
    async fn extract_metadata(&self, path: &Path) -> MediaResult<VideoMetadata> {
        probe_video(&self.runner, &self.config.ffprobe_path, path).await
    }

    async fn transcode_to_quality(
        &self,
        input: &Path,
        output: &Path,
        preset: &QualityPreset,
        source: &VideoMetadata,
        progress: ProgressSink,
    ) -> MediaResult<PathBuf> {
        let started = Instant::now();
        transcode_to_quality(
            &self.runner,
            input,
            output,
            preset,
            source,
            &self.encode_settings(),
            &progress,
        )
        .await?;

        metrics::histogram!("vproc_encode_duration_seconds", "kind" => "mp4")
            .record(started.elapsed().as_secs_f64());
        Ok(output.to_path_buf())
    }

    async fn generate_adaptive_set(
        &self,
        input: &Path,
        output_dir: &Path,
        presets: &[QualityPreset],
        source: &VideoMetadata,
        progress: ProgressSink,
    ) -> MediaResult<PathBuf> {
        let eligible: Vec<&QualityPreset> = presets
            .iter()
            .filter(|p| preset_fits_source(p, source.width))
            .collect();
        if eligible.is_empty() {
            return Err(MediaError::NoEligiblePresets {
                width: source.width,
                height: source.height,
            });
        }

        tokio::fs::create_dir_all(output_dir).await?;

        let settings = self.encode_settings();
        let total = eligible.len() as f64;
        let mut variants = Vec::with_capacity(eligible.len());
        let mut last_error = None;

        for (i, preset) in eligible.into_iter().enumerate() {
            let sink = progress.sub_range(i as f64 / total * 100.0, (i + 1) as f64 / total * 100.0);
            let dir = variant_dir(output_dir, preset);
            tokio::fs::create_dir_all(&dir).await?;

            let cmd = hls_variant_command(
                input,
                &dir,
                preset,
                source,
                &settings,
                self.config.hls_segment_seconds,
            );
            let duration = source.duration;
            let reporter = sink.clone();
            let started = Instant::now();

            match self
                .runner
                .run_with_progress(&cmd, move |p| reporter.report(p.percentage(duration)))
                .await
            {
                Ok(()) => {
                    metrics::histogram!("vproc_encode_duration_seconds", "kind" => "hls")
                        .record(started.elapsed().as_secs_f64());
                    info!(preset = %preset.name, "HLS rendition encoded");
                    variants.push(HlsVariant::for_preset(preset, source));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(preset = %preset.name, error = %e, "HLS rendition failed, skipping");
                    metrics::counter!("vproc_hls_variant_failures_total").increment(1);
                    // Keep partial segments out of the upload.
                    let _ = tokio::fs::remove_dir_all(&dir).await;
                    last_error = Some(e);
                }
            }
            sink.report(100.0);
        }

        if variants.is_empty() {
            return Err(MediaError::AllVariantsFailed(
                last_error.map(|e| e.to_string()).unwrap_or_default(),
            ));
        }

        let master = write_master_playlist(output_dir, &variants).await?;
        info!(
            master = %master.display(),
            variants = variants.len(),
            "Created master HLS playlist"
        );
        Ok(master)
    }

    async fn generate_thumbnails(
        &self,
        input: &Path,
        output_dir: &Path,
        count: u32,
        duration: f64,
    ) -> MediaResult<Vec<PathBuf>> {
        generate_thumbnails(
            &self.runner,
            input,
            output_dir,
            count,
            duration,
            self.config.thumbnail_width,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> VideoMetadata {
        VideoMetadata {
            width: 1920,
            height: 1080,
            duration: 10.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_adaptive_set_rejects_when_nothing_fits() {
        let engine = FfmpegEngine::new(EngineConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let presets = vec![QualityPreset::new("2160p", 3840, 2160, 15000, 192)];

        let err = engine
            .generate_adaptive_set(
                Path::new("in.mp4"),
                dir.path(),
                &presets,
                &source(),
                ProgressSink::noop(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoEligiblePresets { width: 1920, .. }));
    }

    #[tokio::test]
    async fn test_adaptive_set_fails_when_every_variant_fails() {
        let engine = FfmpegEngine::new(EngineConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..EngineConfig::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let presets = vec![
            QualityPreset::new("720p", 1280, 720, 2500, 128),
            QualityPreset::new("480p", 854, 480, 1000, 96),
        ];

        let err = engine
            .generate_adaptive_set(
                Path::new("in.mp4"),
                dir.path(),
                &presets,
                &source(),
                ProgressSink::noop(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::AllVariantsFailed(_)));
        assert!(!dir.path().join("master.m3u8").exists());
        assert!(!dir.path().join("720p").exists());
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env() {
        std::env::set_var("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");
        std::env::set_var("HLS_SEGMENT_SECONDS", "0");
        let config = EngineConfig::from_env();
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.hls_segment_seconds, HLS_SEGMENT_SECONDS);
        std::env::remove_var("FFMPEG_PATH");
        std::env::remove_var("HLS_SEGMENT_SECONDS");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adaptive_set_skips_failed_rendition() {
        use crate::testing::{fake_binary, LAST_ARG};

        let bin = tempfile::tempdir().unwrap();
        // Every rendition writes a segment; 480p then dies before its playlist.
        let body = format!(
            r#"{}
dir=$(dirname "$out")
echo partial > "$dir/segment_000.ts"
case "$out" in */480p/*) echo 'Conversion failed!' >&2; exit 1;; esac
echo '#EXTM3U' > "$out""#,
            LAST_ARG
        );
        let engine = FfmpegEngine::new(EngineConfig {
            ffmpeg_path: fake_binary(bin.path(), "ffmpeg", &body),
            ..EngineConfig::default()
        });
        let out = tempfile::tempdir().unwrap();
        let presets = vec![
            QualityPreset::new("720p", 1280, 720, 2500, 128),
            QualityPreset::new("480p", 854, 480, 1000, 96),
        ];

        let master = engine
            .generate_adaptive_set(
                Path::new("in.mp4"),
                out.path(),
                &presets,
                &source(),
                ProgressSink::noop(),
            )
            .await
            .unwrap();

        let playlist = std::fs::read_to_string(&master).unwrap();
        assert!(playlist.contains("720p/playlist.m3u8"));
        assert!(!playlist.contains("480p"));
        assert!(out.path().join("720p").join("segment_000.ts").exists());
        assert!(!out.path().join("480p").exists());
    }
}
