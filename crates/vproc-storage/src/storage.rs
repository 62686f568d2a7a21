//! The object storage capability and directory uploads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_UPLOAD_CONCURRENCY;
use crate::error::{StorageError, StorageResult};

/// Name of the HLS master playlist looked for by [`ObjectStorage::upload_directory`].
const MASTER_PLAYLIST: &str = "master.m3u8";

/// Result of uploading a directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryUpload {
    /// Public URL of `<prefix>/master.m3u8`, when the tree contains one
    pub manifest_url: Option<String>,
    /// Every key written, sorted
    pub keys: Vec<String>,
}

/// Content type for an artifact, by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Join a key prefix and a relative path with single slashes.
pub fn join_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Reject keys that could escape the bucket or storage root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Uploads artifacts and maps keys to public URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload one file under `key`; returns its public URL.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String>;

    /// Delete the object at `key`. Deleting a missing object is not an error.
    async fn delete_file(&self, key: &str) -> StorageResult<()>;

    /// Public URL for `key`.
    fn public_url(&self, key: &str) -> String;

    /// Maximum uploads in flight for one directory.
    fn upload_concurrency(&self) -> usize {
        DEFAULT_UPLOAD_CONCURRENCY
    }

    /// Upload every file below `dir` to `prefix/<relative path>`.
    ///
    /// Uploads run concurrently. If any upload fails, the files already
    /// written by this call are deleted (best effort) before the error is
    /// returned.
    async fn upload_directory(&self, dir: &Path, prefix: &str) -> StorageResult<DirectoryUpload> {
        let files = list_files(dir).await?;
        let concurrency = self.upload_concurrency().max(1);
        debug!(dir = %dir.display(), files = files.len(), concurrency, "Uploading directory");

        let results: Vec<(String, StorageResult<String>)> = stream::iter(files)
            .map(|(path, relative)| {
                let key = join_key(prefix, &relative);
                async move {
                    let result = self.upload_file(&path, &key, content_type_for(&path)).await;
                    (key, result)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut keys = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (key, result) in results {
            match result {
                Ok(_) => keys.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Directory upload failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            for key in &keys {
                if let Err(del) = self.delete_file(key).await {
                    warn!(key = %key, error = %del, "Failed to roll back uploaded file");
                }
            }
            return Err(e);
        }

        keys.sort();
        let master_key = join_key(prefix, MASTER_PLAYLIST);
        let manifest_url = keys
            .iter()
            .any(|k| *k == master_key)
            .then(|| self.public_url(&master_key));

        info!(prefix, uploaded = keys.len(), "Uploaded directory");
        Ok(DirectoryUpload { manifest_url, keys })
    }
}

/// All regular files below `dir` with their `/`-separated relative paths.
pub async fn list_files(dir: &Path) -> StorageResult<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(dir)
                    .map_err(|e| StorageError::upload_failed(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((path, relative));
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("hls/master.m3u8")), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for(Path::new("segment_000.ts")), "video/mp2t");
        assert_eq!(content_type_for(Path::new("720p.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("thumbnail_1.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("notes.txt")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_join_and_validate_key() {
        assert_eq!(join_key("videos/u/v/", "/hls/master.m3u8"), "videos/u/v/hls/master.m3u8");
        assert_eq!(join_key("", "a.mp4"), "a.mp4");
        assert!(validate_key("videos/u/v/a.mp4").is_ok());
        assert!(validate_key("videos/../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
    }

    /// Records uploads; fails any key listed in `fail`.
    #[derive(Default)]
    struct RecordingStorage {
        uploaded: Mutex<Vec<(String, String)>>,
        deleted: Mutex<Vec<String>>,
        fail: HashSet<String>,
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn upload_file(&self, _path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
            if self.fail.contains(key) {
                return Err(StorageError::upload_failed("boom"));
            }
            self.uploaded
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string()));
            Ok(self.public_url(key))
        }

        async fn delete_file(&self, key: &str) -> StorageResult<()> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.test/{}", key)
        }
    }

    fn hls_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("480p")).unwrap();
        std::fs::write(dir.path().join("master.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(dir.path().join("480p/playlist.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(dir.path().join("480p/segment_000.ts"), b"ts").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_upload_directory_keys_and_types() {
        let dir = hls_tree();
        let storage = RecordingStorage::default();

        let upload = storage.upload_directory(dir.path(), "videos/u/v/hls").await.unwrap();

        assert_eq!(
            upload.manifest_url.as_deref(),
            Some("https://cdn.test/videos/u/v/hls/master.m3u8")
        );
        assert_eq!(
            upload.keys,
            vec![
                "videos/u/v/hls/480p/playlist.m3u8",
                "videos/u/v/hls/480p/segment_000.ts",
                "videos/u/v/hls/master.m3u8",
            ]
        );

        let uploaded = storage.uploaded.lock().unwrap();
        let ts = uploaded.iter().find(|(k, _)| k.ends_with(".ts")).unwrap();
        assert_eq!(ts.1, "video/mp2t");
    }

    #[tokio::test]
    async fn test_upload_directory_rolls_back_on_failure() {
        let dir = hls_tree();
        let storage = RecordingStorage {
            fail: HashSet::from(["videos/u/v/hls/480p/segment_000.ts".to_string()]),
            ..Default::default()
        };

        let err = storage.upload_directory(dir.path(), "videos/u/v/hls").await;
        assert!(err.is_err());

        let mut deleted = storage.deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(
            deleted,
            vec!["videos/u/v/hls/480p/playlist.m3u8", "videos/u/v/hls/master.m3u8"]
        );
    }

    #[tokio::test]
    async fn test_directory_without_master() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpg").unwrap();
        let storage = RecordingStorage::default();

        let upload = storage.upload_directory(dir.path(), "p").await.unwrap();
        assert_eq!(upload.manifest_url, None);
        assert_eq!(upload.keys, vec!["p/a.jpg"]);
    }
}
