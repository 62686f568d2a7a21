//! Filesystem storage backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::LocalConfig;
use crate::error::{StorageError, StorageResult};
use crate::storage::{validate_key, ObjectStorage};

/// Stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
    upload_concurrency: usize,
}

impl LocalStorage {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            root: config.root,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            upload_concurrency: crate::config::DEFAULT_UPLOAD_CONCURRENCY,
        }
    }

    pub fn with_upload_concurrency(mut self, n: usize) -> Self {
        self.upload_concurrency = n;
        self
    }

    /// Filesystem path of `key`.
    pub fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn upload_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<String> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;

        debug!("Stored {} at {}", path.display(), target.display());
        Ok(self.public_url(key))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        let target = self.object_path(key)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", key, e))),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    fn upload_concurrency(&self) -> usize {
        self.upload_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: &Path) -> LocalStorage {
        LocalStorage::new(LocalConfig {
            root: root.to_path_buf(),
            public_base_url: "http://localhost:8080/media/".to_string(),
        })
    }

    #[tokio::test]
    async fn test_upload_and_delete() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), b"video").unwrap();
        let storage = storage(root.path());

        let url = storage
            .upload_file(src.path(), "videos/u/v/variants/480p.mp4", "video/mp4")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8080/media/videos/u/v/variants/480p.mp4");

        let stored = root.path().join("videos/u/v/variants/480p.mp4");
        assert_eq!(std::fs::read(&stored).unwrap(), b"video");

        storage.delete_file("videos/u/v/variants/480p.mp4").await.unwrap();
        assert!(!stored.exists());

        // Already gone
        storage.delete_file("videos/u/v/variants/480p.mp4").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::NamedTempFile::new().unwrap();
        let storage = storage(root.path());

        let err = storage
            .upload_file(src.path(), "../outside.mp4", "video/mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_upload_directory_to_disk() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(work.path().join("720p")).unwrap();
        std::fs::write(work.path().join("master.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(work.path().join("720p/playlist.m3u8"), "#EXTM3U\n").unwrap();

        let storage = storage(root.path()).with_upload_concurrency(2);
        let upload = storage.upload_directory(work.path(), "videos/u/v/hls").await.unwrap();

        assert_eq!(
            upload.manifest_url.as_deref(),
            Some("http://localhost:8080/media/videos/u/v/hls/master.m3u8")
        );
        assert!(root.path().join("videos/u/v/hls/720p/playlist.m3u8").exists());
    }
}
