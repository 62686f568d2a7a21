//! Video processing worker binary.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vproc_firestore::{FirestoreClient, FirestoreStatusRepository, StatusRepository};
use vproc_media::{EngineConfig, FfmpegEngine};
use vproc_queue::{JobQueue, QueueConfig, RedisJobQueue};
use vproc_storage::StorageConfig;
use vproc_worker::{init_tracing, JobExecutor, Pipeline, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vproc-worker");

    let queue_config = QueueConfig::from_env();
    let mut config = WorkerConfig::from_env();
    config.dequeue_timeout = queue_config.dequeue_timeout;
    info!(?config, "Worker config");

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .install()
            .context("failed to start metrics exporter")?;
        info!(port, "Prometheus metrics exporter listening");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue: Arc<dyn JobQueue> =
        Arc::new(RedisJobQueue::new(queue_config).context("failed to create job queue")?);

    let engine = FfmpegEngine::new(EngineConfig::from_env()).with_cancel(shutdown_rx.clone());
    engine.check_binaries().context("ffmpeg/ffprobe not available")?;

    let storage = vproc_storage::connect(StorageConfig::from_env().context("invalid storage config")?)
        .await
        .context("failed to initialize object storage")?;

    let firestore = FirestoreClient::from_env()
        .await
        .context("failed to create Firestore client")?;
    let status: Arc<dyn StatusRepository> = Arc::new(FirestoreStatusRepository::new(firestore));

    let pipeline = Pipeline::new(Arc::new(engine), storage, Arc::clone(&status), &config)
        .context("failed to build pipeline")?;

    let shutdown_timeout = config.shutdown_timeout;
    let executor = Arc::new(JobExecutor::new(
        config,
        queue,
        Arc::new(pipeline),
        status,
        shutdown_rx,
    ));
    let mut running = tokio::spawn(executor.run());

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal, cancelling in-flight jobs");
        }
        joined = &mut running => {
            if let Err(e) = joined {
                error!(error = %e, "Executor exited unexpectedly");
            }
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(shutdown_timeout, running).await {
        Ok(Ok(())) => info!("Worker shutdown complete"),
        Ok(Err(e)) => error!(error = %e, "Executor task failed during shutdown"),
        Err(_) => warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Shutdown timed out; in-flight jobs will be recovered by another worker"
        ),
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
