//! Video processing status persisted on the video document.
//!
//! Every write is a masked merge, so fields owned by other services on the
//! same document are left alone.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use vproc_models::{ProcessingResult, ProcessingStatus, QualityVariantResult, VideoId, VideoMetadata};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{Document, ToFirestoreValue, Value};

/// Document field names.
pub mod fields {
    pub const STATUS: &str = "processingStatus";
    pub const PROGRESS: &str = "processingProgress";
    pub const ERROR: &str = "processingError";
    pub const DURATION: &str = "duration";
    pub const RESOLUTION: &str = "resolution";
    pub const METADATA: &str = "metadata";
    pub const FILE_SIZE: &str = "fileSize";
    pub const STREAMING_URL: &str = "streamingUrl";
    pub const THUMBNAIL_URLS: &str = "thumbnailUrls";
    pub const QUALITY_VARIANTS: &str = "qualityVariants";
    pub const PROCESSING_TIME_MS: &str = "processingTimeMs";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Status snapshot read back from a video document.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStatus {
    pub status: Option<ProcessingStatus>,
    pub progress: u32,
    pub error: Option<String>,
}

/// Persists processing state for a video.
#[async_trait]
pub trait StatusRepository: Send + Sync {
    /// Set status and progress. `error: None` clears any previous error.
    async fn set_status(
        &self,
        video_id: &VideoId,
        status: ProcessingStatus,
        progress: u32,
        error: Option<&str>,
    ) -> FirestoreResult<()>;

    /// Record probed source metadata.
    async fn set_metadata(&self, video_id: &VideoId, metadata: &VideoMetadata) -> FirestoreResult<()>;

    /// Ready at 100%, error cleared and artifact URLs written, in one write.
    async fn mark_ready(&self, video_id: &VideoId, result: &ProcessingResult) -> FirestoreResult<()>;

    /// Failed with a human-readable error. Progress is left as is.
    async fn mark_failed(&self, video_id: &VideoId, error: &str) -> FirestoreResult<()>;
}

pub(crate) type FieldUpdate = (HashMap<String, Value>, Vec<&'static str>);

fn update(entries: Vec<(&'static str, Value)>) -> FieldUpdate {
    let mut mask: Vec<&'static str> = entries.iter().map(|(k, _)| *k).collect();
    mask.push(fields::UPDATED_AT);
    let mut map: HashMap<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    map.insert(fields::UPDATED_AT.to_string(), Utc::now().to_firestore_value());
    (map, mask)
}

pub(crate) fn status_fields(status: ProcessingStatus, progress: u32, error: Option<&str>) -> FieldUpdate {
    update(vec![
        (fields::STATUS, status.as_str().to_firestore_value()),
        (fields::PROGRESS, progress.min(100).to_firestore_value()),
        (fields::ERROR, error.to_firestore_value()),
    ])
}

pub(crate) fn metadata_fields(metadata: &VideoMetadata) -> FieldUpdate {
    update(vec![
        (fields::DURATION, metadata.duration.to_firestore_value()),
        (
            fields::RESOLUTION,
            Value::map([
                ("width", metadata.width.to_firestore_value()),
                ("height", metadata.height.to_firestore_value()),
                ("aspectRatio", metadata.aspect_ratio.to_firestore_value()),
            ]),
        ),
        (
            fields::METADATA,
            Value::map([
                ("codec", metadata.video_codec.to_firestore_value()),
                ("bitrate", metadata.video_bitrate.to_firestore_value()),
                ("frameRate", metadata.frame_rate.to_firestore_value()),
                ("audioCodec", metadata.audio_codec.to_firestore_value()),
                ("audioBitrate", metadata.audio_bitrate.to_firestore_value()),
                ("audioChannels", metadata.audio_channels.to_firestore_value()),
            ]),
        ),
        (fields::FILE_SIZE, metadata.file_size.to_firestore_value()),
    ])
}

fn variant_value(variant: &QualityVariantResult) -> Value {
    Value::map([
        ("quality", variant.quality.to_firestore_value()),
        ("url", variant.url.to_firestore_value()),
        ("fileSize", variant.file_size.to_firestore_value()),
        ("bitrate", variant.bitrate.to_firestore_value()),
        ("codec", variant.codec.to_firestore_value()),
    ])
}

pub(crate) fn ready_fields(result: &ProcessingResult) -> FieldUpdate {
    update(vec![
        (fields::STATUS, ProcessingStatus::Ready.as_str().to_firestore_value()),
        (fields::PROGRESS, 100u32.to_firestore_value()),
        (fields::ERROR, Value::NullValue(())),
        (fields::STREAMING_URL, result.streaming_url.to_firestore_value()),
        (fields::THUMBNAIL_URLS, result.thumbnail_urls.to_firestore_value()),
        (
            fields::QUALITY_VARIANTS,
            Value::array(result.quality_variants.iter().map(variant_value)),
        ),
        (fields::PROCESSING_TIME_MS, result.processing_time_ms.to_firestore_value()),
    ])
}

pub(crate) fn failed_fields(error: &str) -> FieldUpdate {
    update(vec![
        (fields::STATUS, ProcessingStatus::Failed.as_str().to_firestore_value()),
        (fields::ERROR, error.to_firestore_value()),
    ])
}

fn parse_status(value: &str) -> Option<ProcessingStatus> {
    match value {
        "Uploaded" => Some(ProcessingStatus::Uploaded),
        "Processing" => Some(ProcessingStatus::Processing),
        "Ready" => Some(ProcessingStatus::Ready),
        "Failed" => Some(ProcessingStatus::Failed),
        _ => None,
    }
}

impl VideoStatus {
    /// Read the status fields of a video document.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            status: doc
                .field::<String>(fields::STATUS)
                .as_deref()
                .and_then(parse_status),
            progress: doc.field(fields::PROGRESS).unwrap_or(0),
            error: doc.field(fields::ERROR),
        }
    }
}

/// [`StatusRepository`] over the Firestore videos collection.
#[derive(Clone)]
pub struct FirestoreStatusRepository {
    client: FirestoreClient,
    collection: String,
}

impl FirestoreStatusRepository {
    pub fn new(client: FirestoreClient) -> Self {
        let collection = client.config().videos_collection.clone();
        Self { client, collection }
    }

    /// Current status of a video, if the document exists.
    pub async fn get_status(&self, video_id: &VideoId) -> FirestoreResult<Option<VideoStatus>> {
        let doc = self.client.get_document(&self.collection, video_id.as_str()).await?;
        Ok(doc.as_ref().map(VideoStatus::from_document))
    }

    async fn write(&self, video_id: &VideoId, (values, mask): FieldUpdate) -> FirestoreResult<()> {
        self.client
            .update_document(&self.collection, video_id.as_str(), values, Some(mask.as_slice()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusRepository for FirestoreStatusRepository {
    async fn set_status(
        &self,
        video_id: &VideoId,
        status: ProcessingStatus,
        progress: u32,
        error: Option<&str>,
    ) -> FirestoreResult<()> {
        debug!(video_id = %video_id, status = %status, progress, "Updating processing status");
        self.write(video_id, status_fields(status, progress, error)).await
    }

    async fn set_metadata(&self, video_id: &VideoId, metadata: &VideoMetadata) -> FirestoreResult<()> {
        self.write(video_id, metadata_fields(metadata)).await
    }

    async fn mark_ready(&self, video_id: &VideoId, result: &ProcessingResult) -> FirestoreResult<()> {
        self.write(video_id, ready_fields(result)).await
    }

    async fn mark_failed(&self, video_id: &VideoId, error: &str) -> FirestoreResult<()> {
        self.write(video_id, failed_fields(error)).await
    }
}
