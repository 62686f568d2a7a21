//! In-process fakes for worker tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use vproc_firestore::{FirestoreError, FirestoreResult, StatusRepository};
use vproc_media::{thumbnail_file_name, MediaError, MediaResult, ProgressSink, TranscodingEngine};
use vproc_models::{ProcessingResult, ProcessingStatus, QualityPreset, VideoId, VideoMetadata};
use vproc_storage::{ObjectStorage, StorageResult};

/// Last known state of one video document.
#[derive(Debug, Clone, Default)]
pub struct RecordedState {
    pub status: Option<ProcessingStatus>,
    pub progress: u32,
    pub error: Option<String>,
    pub metadata: Option<VideoMetadata>,
    pub result: Option<ProcessingResult>,
}

#[derive(Debug, Default)]
struct StatusLog {
    states: HashMap<String, RecordedState>,
    progress: HashMap<String, Vec<u32>>,
    failures: HashMap<String, Vec<String>>,
}

/// Records every status write.
#[derive(Debug, Default)]
pub struct FakeStatus {
    log: Mutex<StatusLog>,
}

impl FakeStatus {
    pub fn state(&self, video_id: &str) -> RecordedState {
        self.log.lock().unwrap().states.get(video_id).cloned().unwrap_or_default()
    }

    /// Every progress value written, in order.
    pub fn progress_history(&self, video_id: &str) -> Vec<u32> {
        self.log.lock().unwrap().progress.get(video_id).cloned().unwrap_or_default()
    }

    /// Every `mark_failed` message, in order.
    pub fn failures(&self, video_id: &str) -> Vec<String> {
        self.log.lock().unwrap().failures.get(video_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl StatusRepository for FakeStatus {
    async fn set_status(
        &self,
        video_id: &VideoId,
        status: ProcessingStatus,
        progress: u32,
        error: Option<&str>,
    ) -> FirestoreResult<()> {
        let mut log = self.log.lock().unwrap();
        let id = video_id.to_string();
        let state = log.states.entry(id.clone()).or_default();
        state.status = Some(status);
        state.progress = progress.min(100);
        state.error = error.map(str::to_string);
        log.progress.entry(id).or_default().push(progress.min(100));
        Ok(())
    }

    async fn set_metadata(&self, video_id: &VideoId, metadata: &VideoMetadata) -> FirestoreResult<()> {
        let mut log = self.log.lock().unwrap();
        log.states.entry(video_id.to_string()).or_default().metadata = Some(metadata.clone());
        Ok(())
    }

    async fn mark_ready(&self, video_id: &VideoId, result: &ProcessingResult) -> FirestoreResult<()> {
        let mut log = self.log.lock().unwrap();
        let id = video_id.to_string();
        let state = log.states.entry(id.clone()).or_default();
        state.status = Some(ProcessingStatus::Ready);
        state.progress = 100;
        state.error = None;
        state.result = Some(result.clone());
        log.progress.entry(id).or_default().push(100);
        Ok(())
    }

    async fn mark_failed(&self, video_id: &VideoId, error: &str) -> FirestoreResult<()> {
        let mut log = self.log.lock().unwrap();
        let id = video_id.to_string();
        let state = log.states.entry(id.clone()).or_default();
        state.status = Some(ProcessingStatus::Failed);
        state.error = Some(error.to_string());
        log.failures.entry(id).or_default().push(error.to_string());
        Ok(())
    }
}

/// Status repository whose writes always fail.
#[derive(Debug, Default)]
pub struct BrokenStatus;

#[async_trait]
impl StatusRepository for BrokenStatus {
    async fn set_status(&self, _: &VideoId, _: ProcessingStatus, _: u32, _: Option<&str>) -> FirestoreResult<()> {
        Err(FirestoreError::ServerError(503, "unavailable".into()))
    }

    async fn set_metadata(&self, _: &VideoId, _: &VideoMetadata) -> FirestoreResult<()> {
        Err(FirestoreError::ServerError(503, "unavailable".into()))
    }

    async fn mark_ready(&self, _: &VideoId, _: &ProcessingResult) -> FirestoreResult<()> {
        Err(FirestoreError::ServerError(503, "unavailable".into()))
    }

    async fn mark_failed(&self, _: &VideoId, _: &str) -> FirestoreResult<()> {
        Err(FirestoreError::ServerError(503, "unavailable".into()))
    }
}

/// Writes placeholder files instead of encoding.
#[derive(Debug)]
pub struct FakeEngine {
    metadata: VideoMetadata,
    fail_transcode: HashSet<String>,
    probe_error: bool,
    transcoded: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new(duration: f64, width: u32, height: u32) -> Self {
        Self {
            metadata: VideoMetadata {
                duration,
                width,
                height,
                aspect_ratio: vproc_models::aspect_ratio_label(width, height),
                frame_rate: 30.0,
                video_codec: "h264".into(),
                video_bitrate: 5_000_000,
                audio_codec: Some("aac".into()),
                audio_bitrate: 128_000,
                audio_channels: 2,
                file_size: 1024,
            },
            fail_transcode: HashSet::new(),
            probe_error: false,
            transcoded: Mutex::new(Vec::new()),
        }
    }

    /// Make the MP4 encode of `preset` fail with an encoder error.
    pub fn fail_transcode(mut self, preset: &str) -> Self {
        self.fail_transcode.insert(preset.to_string());
        self
    }

    /// Make probing report a file without a video stream.
    pub fn without_video_stream(mut self) -> Self {
        self.probe_error = true;
        self
    }

    /// Presets encoded so far, in order.
    pub fn transcoded(&self) -> Vec<String> {
        self.transcoded.lock().unwrap().clone()
    }
}

async fn touch(path: &Path, contents: &[u8]) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[async_trait]
impl TranscodingEngine for FakeEngine {
    async fn extract_metadata(&self, path: &Path) -> MediaResult<VideoMetadata> {
        if self.probe_error {
            return Err(MediaError::NoVideoStream(path.to_path_buf()));
        }
        Ok(self.metadata.clone())
    }

    async fn transcode_to_quality(
        &self,
        _input: &Path,
        output: &Path,
        preset: &QualityPreset,
        _source: &VideoMetadata,
        _progress: ProgressSink,
    ) -> MediaResult<PathBuf> {
        if self.fail_transcode.contains(&preset.name) {
            return Err(MediaError::ffmpeg_failed(
                format!("encoding {} failed", preset.name),
                Some("Conversion failed!".into()),
                Some(1),
            ));
        }
        touch(output, b"mp4").await?;
        self.transcoded.lock().unwrap().push(preset.name.clone());
        Ok(output.to_path_buf())
    }

    async fn generate_adaptive_set(
        &self,
        _input: &Path,
        output_dir: &Path,
        presets: &[QualityPreset],
        _source: &VideoMetadata,
        _progress: ProgressSink,
    ) -> MediaResult<PathBuf> {
        for preset in presets {
            let dir = output_dir.join(&preset.name);
            touch(&dir.join("playlist.m3u8"), b"#EXTM3U\n").await?;
            touch(&dir.join("segment_000.ts"), b"ts").await?;
        }
        let master = output_dir.join("master.m3u8");
        touch(&master, b"#EXTM3U\n").await?;
        Ok(master)
    }

    async fn generate_thumbnails(
        &self,
        _input: &Path,
        output_dir: &Path,
        count: u32,
        _duration: f64,
    ) -> MediaResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for n in 1..=count as usize {
            let path = output_dir.join(thumbnail_file_name(n));
            touch(&path, b"jpg").await?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Keeps uploaded objects in memory as key -> content type.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, String>>,
    stall_on: Option<String>,
}

impl MemoryStorage {
    /// Store `key` and then never return from its upload.
    pub fn stall_on(mut self, key: &str) -> Self {
        self.stall_on = Some(key.to_string());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload_file(&self, _path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), content_type.to_string());
        if self.stall_on.as_deref() == Some(key) {
            return std::future::pending().await;
        }
        Ok(self.public_url(key))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
