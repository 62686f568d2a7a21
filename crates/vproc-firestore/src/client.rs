//! Firestore REST API client.
//!
//! Covers the document reads and masked merges the status repository needs:
//! - Token caching with refresh margin, one retry on an expired token
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter for retryable failures
//! - Tracing spans and request metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::{AuthSource, TokenCache};
use crate::types::{Document, Value};

/// Token the Firestore emulator accepts as an admin credential.
const EMULATOR_TOKEN: &str = "owner";

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// Collection holding video documents
    pub videos_collection: String,
    /// `host:port` of a Firestore emulator; when set, requests go there
    /// over plain HTTP without Google credentials
    pub emulator_host: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    /// Config for `project_id` with defaults for everything else.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            videos_collection: "videos".to_string(),
            emulator_host: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .unwrap_or_default();
        if project_id.is_empty() {
            return Err(FirestoreError::config_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
            ));
        }

        let mut config = Self::new(project_id);
        if let Ok(db) = std::env::var("FIRESTORE_DATABASE_ID") {
            config.database_id = db;
        }
        if let Ok(collection) = std::env::var("FIRESTORE_VIDEOS_COLLECTION") {
            config.videos_collection = collection;
        }
        config.emulator_host = std::env::var("FIRESTORE_EMULATOR_HOST")
            .ok()
            .filter(|h| !h.is_empty());
        if let Some(secs) = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.retry = RetryConfig::from_env();
        Ok(config)
    }

    fn base_url(&self) -> String {
        let origin = match &self.emulator_host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("http://{}", host),
            None => "https://firestore.googleapis.com".to_string(),
        };
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            origin, self.project_id, self.database_id
        )
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a client, resolving credentials from the environment.
    ///
    /// Uses the emulator token when an emulator host is configured, the
    /// service account in `GOOGLE_APPLICATION_CREDENTIALS` when set, and
    /// Application Default Credentials otherwise.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let auth = if config.emulator_host.is_some() {
            AuthSource::Static(EMULATOR_TOKEN.to_string())
        } else {
            AuthSource::Provider(Self::create_auth_provider().await?)
        };
        Self::with_auth(config, auth)
    }

    /// Create a client with an explicit token source.
    pub fn with_auth(config: FirestoreConfig, auth: AuthSource) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vproc-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            config,
            token_cache: Arc::new(TokenCache::new(auth)),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    async fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;
        if let Some(sa) = service_account {
            return Ok(Arc::new(sa));
        }
        gcp_auth::provider()
            .await
            .map_err(|e| FirestoreError::auth_error(format!("No Google credentials found: {}", e)))
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        )
    }

    /// Get a document; `None` when it does not exist.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);
        let url = url.as_str();

        with_retry(&self.config.retry, "get_document", || {
            self.execute_request("get_document", collection, doc_id, async move {
                let response = self.send_authorized(|token| self.http.get(url).bearer_auth(token)).await?;
                match response.status() {
                    StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                    StatusCode::NOT_FOUND => Ok(None),
                    status => Err(Self::error_from_response(status, url, response).await),
                }
            })
        })
        .await
    }

    /// Merge `fields` into a document.
    ///
    /// With an update mask only the listed field paths are written (a path
    /// in the mask but absent from `fields` is deleted) and the document is
    /// created if missing. Without a mask the whole document is replaced.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<&[&str]>,
    ) -> FirestoreResult<Document> {
        let mut url = self.document_url(collection, doc_id);
        if let Some(mask) = update_mask.filter(|m| !m.is_empty()) {
            let params: Vec<String> = mask
                .iter()
                .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
                .collect();
            url = format!("{}?{}", url, params.join("&"));
        }
        let body = Document::new(fields);
        let (url, body) = (url.as_str(), &body);

        with_retry(&self.config.retry, "update_document", || {
            self.execute_request("update_document", collection, doc_id, async move {
                let response = self
                    .send_authorized(|token| self.http.patch(url).bearer_auth(token).json(body))
                    .await?;
                match response.status() {
                    StatusCode::OK => Ok(response.json::<Document>().await?),
                    status => Err(Self::error_from_response(status, url, response).await),
                }
            })
        })
        .await
    }

    /// Send a request, retrying once with a fresh token if the current one
    /// has expired.
    async fn send_authorized<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::auth_error(body));
        }

        debug!("Firestore access token expired, refreshing");
        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(&token).send().await?)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Run one request attempt inside a span and record its metrics.
    async fn execute_request<T, F>(&self, operation: &str, collection: &str, doc_id: &str, fut: F) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = %doc_id
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }

    async fn error_from_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        match (status, retry_after) {
            (StatusCode::TOO_MANY_REQUESTS, Some(secs)) => {
                FirestoreError::RateLimited(secs.saturating_mul(1000))
            }
            _ => FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_requires_project() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        assert!(matches!(
            FirestoreConfig::from_env(),
            Err(FirestoreError::ConfigError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_defaults_and_overrides() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::set_var("FIRESTORE_VIDEOS_COLLECTION", "uploads");
        std::env::remove_var("FIRESTORE_DATABASE_ID");
        std::env::remove_var("FIRESTORE_EMULATOR_HOST");

        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.database_id, "(default)");
        assert_eq!(config.videos_collection, "uploads");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(
            config.base_url(),
            "https://firestore.googleapis.com/v1/projects/test-project/databases/(default)/documents"
        );

        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIRESTORE_VIDEOS_COLLECTION");
    }

    #[test]
    fn test_emulator_base_url() {
        let mut config = FirestoreConfig::new("demo");
        config.emulator_host = Some("localhost:8080".to_string());
        assert_eq!(
            config.base_url(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents"
        );
    }
}
