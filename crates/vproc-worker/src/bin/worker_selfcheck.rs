//! Preflight check for worker containers: exits non-zero if the worker
//! could not start.

use std::path::Path;

use vproc_media::{EngineConfig, FfmpegEngine};
use vproc_queue::RedisJobQueue;
use vproc_storage::{S3Storage, StorageBackend, StorageConfig};
use vproc_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_media_tools()?;
    ensure_env_present(&["REDIS_URL"])?;
    let storage = StorageConfig::from_env().map_err(|e| anyhow::anyhow!("invalid storage config: {}", e))?;
    ensure_storage(storage).await?;
    ensure_project_id()?;
    ensure_queue().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let scratch = tempfile::tempdir_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} is not writable: {}", path.display(), e))?;
    scratch.close()?;
    Ok(())
}

fn ensure_media_tools() -> anyhow::Result<()> {
    FfmpegEngine::new(EngineConfig::from_env())
        .check_binaries()
        .map_err(|e| anyhow::anyhow!("media tools not available: {}", e))
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

fn ensure_project_id() -> anyhow::Result<()> {
    if std::env::var("GCP_PROJECT_ID").is_err() && std::env::var("FIREBASE_PROJECT_ID").is_err() {
        return Err(anyhow::anyhow!(
            "missing required env var GCP_PROJECT_ID (or FIREBASE_PROJECT_ID)"
        ));
    }
    Ok(())
}

async fn ensure_storage(config: StorageConfig) -> anyhow::Result<()> {
    match config.backend {
        StorageBackend::S3(s3) => {
            let bucket = s3.bucket.clone();
            S3Storage::new(s3)
                .await?
                .check_connectivity()
                .await
                .map_err(|e| anyhow::anyhow!("bucket {} not reachable: {}", bucket, e))
        }
        StorageBackend::Local(local) => ensure_workdir(&local.root).await,
    }
}

async fn ensure_queue() -> anyhow::Result<()> {
    let queue = RedisJobQueue::from_env()?;
    queue
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("redis not reachable: {}", e))
}
