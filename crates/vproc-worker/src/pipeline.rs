//! The processing pipeline for one job attempt.
//!
//! Stages run strictly in order and each ends on a progress milestone:
//! download (0-10), metadata (10-20), thumbnails (20-30), transcoding
//! (30-90), finalize (Ready at 100). The attempt owns a fresh working
//! directory that is removed on every exit path. Objects uploaded by a
//! failed attempt are deleted again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use vproc_firestore::StatusRepository;
use vproc_media::{ProgressSink, TranscodingEngine};
use vproc_models::encoding::DEFAULT_VIDEO_CODEC_LABEL;
use vproc_models::{
    preset_fits_source, ProcessingJob, ProcessingResult, ProcessingStatus, QualityPreset,
    QualityVariantResult, VideoMetadata,
};
use vproc_storage::storage::{join_key, list_files};
use vproc_storage::ObjectStorage;

use crate::config::WorkerConfig;
use crate::download::{download_client, download_source};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::progress::ProgressTracker;

/// Progress at the end of each stage.
pub mod milestones {
    pub const DOWNLOADED: f64 = 10.0;
    pub const METADATA: f64 = 20.0;
    pub const THUMBNAILS: f64 = 30.0;
    pub const TRANSCODED: f64 = 90.0;
}

/// Drives one job through every stage.
pub struct Pipeline {
    engine: Arc<dyn TranscodingEngine>,
    storage: Arc<dyn ObjectStorage>,
    status: Arc<dyn StatusRepository>,
    http: reqwest::Client,
    work_root: PathBuf,
}

/// Keys written during one attempt, for rollback.
///
/// A key is recorded before its upload starts so an interrupted upload is
/// still rolled back.
#[derive(Debug, Default)]
struct UploadLedger {
    keys: Vec<String>,
}

impl UploadLedger {
    fn record(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    fn extend(&mut self, keys: impl IntoIterator<Item = String>) {
        self.keys.extend(keys);
    }
}

impl Pipeline {
    pub fn new(
        engine: Arc<dyn TranscodingEngine>,
        storage: Arc<dyn ObjectStorage>,
        status: Arc<dyn StatusRepository>,
        config: &WorkerConfig,
    ) -> WorkerResult<Self> {
        Ok(Self {
            engine,
            storage,
            status,
            http: download_client(config.download_timeout)?,
            work_root: config.work_dir.clone(),
        })
    }

    /// Run one attempt of `job`.
    ///
    /// On success the video is already `Ready`. On failure the status is
    /// left for the caller to settle; no progress write for this attempt
    /// lands after this returns.
    pub async fn process(
        &self,
        job: &ProcessingJob,
        cancel: &watch::Receiver<bool>,
    ) -> WorkerResult<ProcessingResult> {
        job.validate().map_err(WorkerError::InvalidJob)?;

        let logger = JobLogger::new(job);
        let started = Instant::now();
        logger.log_start(&job.source_url);

        self.status
            .set_status(&job.video_id, ProcessingStatus::Processing, 0, None)
            .await?;

        let work_dir = self.create_work_dir(job).await?;
        let tracker = ProgressTracker::start(Arc::clone(&self.status), job.video_id.clone(), 0);
        let mut uploads = UploadLedger::default();

        let outcome = {
            let run = self.run_stages(job, work_dir.path(), tracker.sink().clone(), &mut uploads, &logger);
            tokio::select! {
                result = run.instrument(logger.create_span()) => result,
                _ = wait_cancelled(cancel.clone()) => Err(WorkerError::Cancelled),
            }
        };
        tracker.finish().await;

        let outcome = match outcome {
            Ok(mut result) => {
                result.processing_time_ms = started.elapsed().as_millis() as u64;
                match self.status.mark_ready(&job.video_id, &result).await {
                    Ok(()) => Ok(result),
                    Err(e) => Err(WorkerError::from(e)),
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            logger.log_error(&e.to_string());
            self.rollback(&uploads).await;
        }
        remove_work_dir(work_dir).await;

        if let Ok(result) = &outcome {
            logger.log_completion(&format!(
                "{} variants, {} thumbnails in {}ms",
                result.quality_variants.len(),
                result.thumbnail_urls.len(),
                result.processing_time_ms
            ));
        }
        outcome
    }

    async fn run_stages(
        &self,
        job: &ProcessingJob,
        dir: &Path,
        sink: ProgressSink,
        uploads: &mut UploadLedger,
        logger: &JobLogger,
    ) -> WorkerResult<ProcessingResult> {
        let prefix = job.storage_prefix();

        // Downloading
        let stage = Instant::now();
        let source = dir.join(format!(
            "source.{}",
            job.source_extension().unwrap_or_else(|| "mp4".to_string())
        ));
        download_source(&self.http, &job.source_url, &source, &sink.sub_range(0.0, milestones::DOWNLOADED))
            .await?;
        finish_stage(&sink, logger, "download", milestones::DOWNLOADED, stage);

        // Extracting metadata
        let stage = Instant::now();
        let metadata = self.engine.extract_metadata(&source).await?;
        self.status.set_metadata(&job.video_id, &metadata).await?;
        finish_stage(&sink, logger, "metadata", milestones::METADATA, stage);

        // Generating thumbnails
        let stage = Instant::now();
        let thumbnail_urls = self
            .thumbnails(job, &source, dir, &metadata, &prefix, uploads)
            .await?;
        finish_stage(&sink, logger, "thumbnails", milestones::THUMBNAILS, stage);

        // Transcoding
        let stage = Instant::now();
        let transcode_sink = sink.sub_range(milestones::THUMBNAILS, milestones::TRANSCODED);
        let presets = eligible_presets(&job.options.quality_presets, &metadata, logger);
        let options = &job.options;
        if presets.is_empty() && (options.generate_quality_variants || options.generate_hls) {
            logger.log_warning(&format!(
                "no quality preset fits source {}, skipping renditions",
                metadata.resolution()
            ));
        }

        let (variant_sink, hls_sink) = match (options.generate_quality_variants, options.generate_hls) {
            (true, true) => (transcode_sink.sub_range(0.0, 50.0), transcode_sink.sub_range(50.0, 100.0)),
            _ => (transcode_sink.clone(), transcode_sink),
        };

        let mut quality_variants = Vec::new();
        if options.generate_quality_variants {
            quality_variants = self
                .variants(&source, dir, &presets, &metadata, &prefix, &variant_sink, uploads)
                .await?;
        }

        let mut manifest_url = None;
        if options.generate_hls && !presets.is_empty() {
            manifest_url = self
                .adaptive_set(&source, dir, &presets, &metadata, &prefix, hls_sink, uploads)
                .await?;
        }
        finish_stage(&sink, logger, "transcode", milestones::TRANSCODED, stage);

        // Finalizing
        let mut result = ProcessingResult {
            success: true,
            metadata: Some(metadata),
            quality_variants,
            thumbnail_urls,
            streaming_url: manifest_url,
            ..Default::default()
        };
        if result.streaming_url.is_none() {
            result.streaming_url = result.highest_bitrate_variant_url().map(str::to_string);
        }
        Ok(result)
    }

    async fn thumbnails(
        &self,
        job: &ProcessingJob,
        source: &Path,
        dir: &Path,
        metadata: &VideoMetadata,
        prefix: &str,
        uploads: &mut UploadLedger,
    ) -> WorkerResult<Vec<String>> {
        let count = job.options.thumbnail_count;
        if count == 0 {
            return Ok(Vec::new());
        }

        let paths = self
            .engine
            .generate_thumbnails(source, &dir.join("thumbnails"), count, metadata.duration)
            .await?;
        if paths.len() < count as usize {
            warn!(
                video_id = %job.video_id,
                requested = count,
                generated = paths.len(),
                "Fewer thumbnails than requested"
            );
        }

        let mut urls = Vec::with_capacity(paths.len());
        for path in paths {
            let key = format!("{}/thumbnails/{}", prefix, file_name(&path));
            uploads.record(key.as_str());
            urls.push(self.storage.upload_file(&path, &key, "image/jpeg").await?);
        }
        Ok(urls)
    }

    #[allow(clippy::too_many_arguments)]
    async fn variants(
        &self,
        source: &Path,
        dir: &Path,
        presets: &[QualityPreset],
        metadata: &VideoMetadata,
        prefix: &str,
        sink: &ProgressSink,
        uploads: &mut UploadLedger,
    ) -> WorkerResult<Vec<QualityVariantResult>> {
        let variants_dir = dir.join("variants");
        tokio::fs::create_dir_all(&variants_dir).await?;

        let total = presets.len().max(1) as f64;
        let mut results = Vec::with_capacity(presets.len());
        for (i, preset) in presets.iter().enumerate() {
            let step = sink.sub_range(i as f64 / total * 100.0, (i + 1) as f64 / total * 100.0);
            let output = variants_dir.join(format!("{}.mp4", preset.name));

            let encoded = self
                .engine
                .transcode_to_quality(source, &output, preset, metadata, step.clone())
                .await?;
            let file_size = tokio::fs::metadata(&encoded).await?.len();

            let key = format!("{}/variants/{}.mp4", prefix, preset.name);
            uploads.record(key.as_str());
            let url = self.storage.upload_file(&encoded, &key, "video/mp4").await?;
            step.report(100.0);

            debug!(preset = %preset.name, file_size, "Quality variant uploaded");
            results.push(QualityVariantResult {
                quality: preset.name.clone(),
                url,
                file_size,
                bitrate: preset.video_bitrate as u64 * 1000,
                codec: DEFAULT_VIDEO_CODEC_LABEL.to_string(),
            });
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn adaptive_set(
        &self,
        source: &Path,
        dir: &Path,
        presets: &[QualityPreset],
        metadata: &VideoMetadata,
        prefix: &str,
        sink: ProgressSink,
        uploads: &mut UploadLedger,
    ) -> WorkerResult<Option<String>> {
        let hls_dir = dir.join("hls");
        self.engine
            .generate_adaptive_set(source, &hls_dir, presets, metadata, sink)
            .await?;

        let hls_prefix = format!("{}/hls", prefix);
        let files = list_files(&hls_dir).await?;
        uploads.extend(files.iter().map(|(_, relative)| join_key(&hls_prefix, relative)));

        let upload = self.storage.upload_directory(&hls_dir, &hls_prefix).await?;
        Ok(upload.manifest_url)
    }

    async fn create_work_dir(&self, job: &ProcessingJob) -> WorkerResult<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| WorkerError::work_dir(format!("{}: {}", self.work_root.display(), e)))?;

        let prefix: String = job
            .video_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir_in(&self.work_root)
            .map_err(|e| WorkerError::work_dir(format!("{}: {}", self.work_root.display(), e)))
    }

    async fn rollback(&self, uploads: &UploadLedger) {
        if uploads.keys.is_empty() {
            return;
        }
        info!(objects = uploads.keys.len(), "Rolling back uploaded artifacts");
        for key in &uploads.keys {
            if let Err(e) = self.storage.delete_file(key).await {
                warn!(key = %key, error = %e, "Failed to delete uploaded artifact");
            }
        }
    }
}

/// Presets that would not upscale the source, in job order.
fn eligible_presets(presets: &[QualityPreset], metadata: &VideoMetadata, logger: &JobLogger) -> Vec<QualityPreset> {
    let (eligible, skipped): (Vec<_>, Vec<_>) = presets
        .iter()
        .cloned()
        .partition(|p| preset_fits_source(p, metadata.width));
    for preset in &skipped {
        logger.log_warning(&format!(
            "skipping preset {} ({}x{}): larger than source {}",
            preset.name,
            preset.width,
            preset.height,
            metadata.resolution()
        ));
    }
    eligible
}

fn finish_stage(sink: &ProgressSink, logger: &JobLogger, stage: &'static str, milestone: f64, started: Instant) {
    sink.report(milestone);
    metrics::histogram!("vproc_stage_duration_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());
    logger.log_stage(stage, milestone as u32);
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolves once `cancel` reads true; never if the sender is gone.
async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn remove_work_dir(dir: tempfile::TempDir) {
    let path = dir.path().to_path_buf();
    match tokio::task::spawn_blocking(move || dir.close()).await {
        Ok(Ok(())) => debug!(path = %path.display(), "Removed working directory"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to remove working directory"),
        Err(e) => warn!(path = %path.display(), error = %e, "Working directory cleanup task failed"),
    }
}
