//! S3-compatible storage backend (AWS S3, Cloudflare R2, MinIO).

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::config::{S3Config, DEFAULT_UPLOAD_CONCURRENCY};
use crate::error::{StorageError, StorageResult};
use crate::storage::{validate_key, ObjectStorage};

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base_url: String,
    upload_concurrency: usize,
}

impl S3Storage {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let client = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let credentials = Credentials::new(key_id, secret, None, None, "static");
                let mut builder = Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials)
                    .force_path_style(true);
                if let Some(endpoint) = &config.endpoint_url {
                    builder = builder.endpoint_url(endpoint);
                }
                Client::from_conf(builder.build())
            }
            (None, None) => {
                let shared: aws_types::SdkConfig = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &config.endpoint_url {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                return Err(StorageError::config_error(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together",
                ))
            }
        };

        let public_base_url = public_base_url(&config);

        Ok(Self {
            client,
            bucket: config.bucket,
            public_base_url,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        })
    }

    pub fn with_upload_concurrency(mut self, n: usize) -> Self {
        self.upload_concurrency = n;
        self
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("Storage connectivity check failed: {}", e)))?;
        Ok(())
    }
}

/// Base URL objects are served from.
///
/// Uses the configured public base when set, else path-style URLs on the
/// endpoint, else the virtual-hosted AWS bucket domain.
fn public_base_url(config: &S3Config) -> String {
    if let Some(base) = &config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    match &config.endpoint_url {
        Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
    }
}

/// Percent-encode each key segment, keeping the separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(self.public_url(key))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(format!("{}: {}", key, e)))?;

        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, encode_key(key))
    }

    fn upload_concurrency(&self) -> usize {
        self.upload_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            bucket: "media".to_string(),
            region: "eu-west-1".to_string(),
            public_base_url: None,
        }
    }

    #[test]
    fn test_public_base_url_variants() {
        assert_eq!(public_base_url(&config()), "https://media.s3.eu-west-1.amazonaws.com");

        let r2 = S3Config {
            endpoint_url: Some("https://acct.r2.cloudflarestorage.com/".into()),
            ..config()
        };
        assert_eq!(public_base_url(&r2), "https://acct.r2.cloudflarestorage.com/media");

        let cdn = S3Config {
            public_base_url: Some("https://cdn.example.com/".into()),
            ..r2
        };
        assert_eq!(public_base_url(&cdn), "https://cdn.example.com");
    }

    #[test]
    fn test_encode_key_keeps_separators() {
        assert_eq!(
            encode_key("videos/user 1/v/thumbnails/thumbnail_1.jpg"),
            "videos/user%201/v/thumbnails/thumbnail_1.jpg"
        );
    }

    #[tokio::test]
    async fn test_static_credentials_client() {
        let storage = S3Storage::new(S3Config {
            endpoint_url: Some("http://localhost:9000".into()),
            access_key_id: Some("minio".into()),
            secret_access_key: Some("minio123".into()),
            ..config()
        })
        .await
        .unwrap();
        assert_eq!(
            storage.public_url("videos/u/v/hls/master.m3u8"),
            "http://localhost:9000/media/videos/u/v/hls/master.m3u8"
        );
    }

    #[tokio::test]
    async fn test_half_configured_credentials_rejected() {
        let result = S3Storage::new(S3Config {
            access_key_id: Some("only-key".into()),
            ..config()
        })
        .await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    async fn storage_at(server: &wiremock::MockServer) -> S3Storage {
        S3Storage::new(S3Config {
            endpoint_url: Some(server.uri()),
            access_key_id: Some("minio".into()),
            secret_access_key: Some("minio123".into()),
            ..config()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_check_connectivity_heads_the_bucket() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        storage_at(&server).await.check_connectivity().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_connectivity_reports_missing_bucket() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = storage_at(&server).await.check_connectivity().await.unwrap_err();
        assert!(matches!(err, StorageError::AwsSdk(_)));
    }
}
