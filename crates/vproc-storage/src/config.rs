//! Storage backend selection.

use std::path::PathBuf;

use crate::error::{StorageError, StorageResult};

/// Default number of concurrent uploads for a directory.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 8;

/// S3-compatible backend settings (AWS S3, Cloudflare R2, MinIO).
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom S3 API endpoint; `None` for AWS
    pub endpoint_url: Option<String>,
    /// Static credentials; when absent the default AWS provider chain is used
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Bucket name
    pub bucket: String,
    /// Region ("auto" for R2)
    pub region: String,
    /// Base of public object URLs (CDN or bucket domain)
    pub public_base_url: Option<String>,
}

/// Filesystem backend settings.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Directory objects are written under
    pub root: PathBuf,
    /// Base of public object URLs
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    S3(S3Config),
    Local(LocalConfig),
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Concurrent uploads per directory
    pub upload_concurrency: usize,
}

impl StorageConfig {
    /// Create config from environment variables.
    ///
    /// `STORAGE_BACKEND` selects `s3` (default) or `local`.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "s3" | "r2" => StorageBackend::S3(S3Config {
                endpoint_url: non_empty_var("S3_ENDPOINT_URL"),
                access_key_id: non_empty_var("S3_ACCESS_KEY_ID"),
                secret_access_key: non_empty_var("S3_SECRET_ACCESS_KEY"),
                bucket: std::env::var("S3_BUCKET")
                    .map_err(|_| StorageError::config_error("S3_BUCKET not set"))?,
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
                public_base_url: non_empty_var("S3_PUBLIC_BASE_URL"),
            }),
            "local" => {
                let root = PathBuf::from(
                    std::env::var("LOCAL_STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string()),
                );
                let public_base_url = non_empty_var("LOCAL_PUBLIC_BASE_URL")
                    .unwrap_or_else(|| format!("file://{}", root.display()));
                StorageBackend::Local(LocalConfig {
                    root,
                    public_base_url,
                })
            }
            other => {
                return Err(StorageError::config_error(format!(
                    "unknown STORAGE_BACKEND: {}",
                    other
                )))
            }
        };

        let upload_concurrency = std::env::var("STORAGE_UPLOAD_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY);

        Ok(Self {
            backend,
            upload_concurrency,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_local_backend_from_env() {
        std::env::set_var("STORAGE_BACKEND", "local");
        std::env::set_var("LOCAL_STORAGE_ROOT", "/srv/media");
        std::env::remove_var("LOCAL_PUBLIC_BASE_URL");

        let config = StorageConfig::from_env().unwrap();
        match config.backend {
            StorageBackend::Local(local) => {
                assert_eq!(local.root, PathBuf::from("/srv/media"));
                assert_eq!(local.public_base_url, "file:///srv/media");
            }
            other => panic!("expected local backend, got {:?}", other),
        }
        assert_eq!(config.upload_concurrency, DEFAULT_UPLOAD_CONCURRENCY);

        std::env::remove_var("STORAGE_BACKEND");
        std::env::remove_var("LOCAL_STORAGE_ROOT");
    }

    #[test]
    #[serial]
    fn test_s3_backend_requires_bucket() {
        std::env::set_var("STORAGE_BACKEND", "s3");
        std::env::remove_var("S3_BUCKET");
        assert!(StorageConfig::from_env().is_err());

        std::env::set_var("S3_BUCKET", "media");
        let config = StorageConfig::from_env().unwrap();
        assert!(matches!(config.backend, StorageBackend::S3(ref s3) if s3.bucket == "media"));

        std::env::remove_var("STORAGE_BACKEND");
        std::env::remove_var("S3_BUCKET");
    }

    #[test]
    #[serial]
    fn test_unknown_backend() {
        std::env::set_var("STORAGE_BACKEND", "ftp");
        assert!(StorageConfig::from_env().is_err());
        std::env::remove_var("STORAGE_BACKEND");
    }
}
