//! Streaming source download.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use vproc_media::ProgressSink;

use crate::error::{WorkerError, WorkerResult};

/// HTTP client for source downloads; `timeout` bounds a whole transfer.
pub fn download_client(timeout: Duration) -> WorkerResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("vproc-worker/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| WorkerError::download_failed(format!("failed to build HTTP client: {}", e)))
}

/// Stream `url` into `dest`; returns the number of bytes written.
///
/// Reports 0-100 on `progress` when the server sends a content length.
/// A partially written file is removed on failure.
pub async fn download_source(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &ProgressSink,
) -> WorkerResult<u64> {
    let result = stream_to_file(client, url, dest, progress).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &ProgressSink,
) -> WorkerResult<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| WorkerError::download_failed(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(WorkerError::DownloadStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let total = response.content_length().filter(|len| *len > 0);
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let data = chunk.map_err(|e| WorkerError::download_failed(format!("{}: {}", url, e)))?;
        file.write_all(&data).await?;
        written += data.len() as u64;
        if let Some(total) = total {
            progress.report(written as f64 / total as f64 * 100.0);
        }
    }
    file.flush().await?;

    if written == 0 {
        return Err(WorkerError::download_failed(format!("{}: empty response body", url)));
    }

    debug!(url, bytes = written, "Source stream finished");
    info!(
        path = %dest.display(),
        size_mb = written as f64 / 1_048_576.0,
        "Downloaded source video"
    );
    Ok(written)
}
