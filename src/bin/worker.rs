use media_pipeline::{
    config::{AppConfig, MediaHost},
    db::{self, queries::PgStatusStore},
    models::envelope::{BinaryJob, PostJob},
    routes::metrics::describe_metrics,
    services::{
        blob::LocalBlobStore,
        consumer::{Consumer, ConsumerSettings, RetryPolicy},
        queue::{QueueError, RedisQueue},
        storage::R2Client,
        uploader::{CloudinaryUploader, MediaUploader},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting media-pipeline worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let worker_id = config
        .require_worker_id()
        .expect("WORKER_ID must be set to a name unique to this worker")
        .to_string();

    // Prometheus scrape endpoint for the worker's counters
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();
    tracing::info!(%metrics_addr, "Serving worker metrics");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!(media_host = ?config.media_host, "Initializing services");
    let uploader: Arc<dyn MediaUploader> = match config.media_host {
        MediaHost::Cloudinary => Arc::new(
            CloudinaryUploader::new(
                &config.cloudinary_cloud_name,
                &config.cloudinary_api_key,
                &config.cloudinary_api_secret,
                &config.media_folder,
            )
            .expect("Failed to initialize Cloudinary client"),
        ),
        MediaHost::R2 => Arc::new(
            R2Client::new(
                &config.r2_bucket,
                &config.r2_endpoint,
                &config.r2_access_key,
                &config.r2_secret_key,
                &config.r2_public_url,
                &config.media_folder,
            )
            .expect("Failed to initialize R2 client"),
        ),
    };

    let queue = Arc::new(
        RedisQueue::new(&config.redis_url, &worker_id)
            .expect("Failed to initialize job queue"),
    );
    let blobs = Arc::new(
        LocalBlobStore::new(&config.staging_dir)
            .await
            .expect("Failed to open staging directory"),
    );
    let store = Arc::new(PgStatusStore::new(db_pool));

    let settings = ConsumerSettings {
        keep_files: config.keep_files,
        retry: RetryPolicy {
            max_attempts: config.max_attempts,
        },
    };
    let consumer = Arc::new(Consumer::new(blobs, store, queue, uploader, settings));

    tracing::info!(
        worker_id = %worker_id,
        keep_files = settings.keep_files,
        max_attempts = ?settings.retry.max_attempts,
        "Worker ready, starting job processing loops"
    );

    let shutdown = CancellationToken::new();

    // One loop per queue, each handling a single delivery at a time
    let mut loops = JoinSet::new();
    loops.spawn({
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        async move { ("posts", consumer.run::<PostJob>(shutdown).await) }
    });
    loops.spawn({
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        async move { ("binaries", consumer.run::<BinaryJob>(shutdown).await) }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, finishing in-flight jobs");
        }
        Some(exited) = loops.join_next() => {
            log_loop_exit(exited);
            tracing::error!("A consumer loop exited early, shutting down");
        }
    }
    shutdown.cancel();

    while let Some(exited) = loops.join_next().await {
        log_loop_exit(exited);
    }

    tracing::info!("Worker stopped");
}

fn log_loop_exit(exited: Result<(&'static str, Result<(), QueueError>), JoinError>) {
    match exited {
        Ok((queue, Ok(()))) => tracing::info!(queue, "Consumer loop finished"),
        Ok((queue, Err(e))) => tracing::error!(queue, error = %e, "Consumer loop failed"),
        Err(e) => tracing::error!(error = %e, "Consumer task panicked"),
    }
}
