use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use media_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::PgStatusStore},
    models::envelope::{BINARY_QUEUE, POST_QUEUE},
    routes,
    services::{
        blob::LocalBlobStore,
        producer::Producer,
        queue::{Broker, RedisQueue},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing media-pipeline API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");
    let store = Arc::new(PgStatusStore::new(db_pool));

    // Initialize Redis job queues
    tracing::info!("Connecting to Redis job queue");
    let queue = Arc::new(
        // Publish-only: this id never names an in-flight list
        RedisQueue::new(&config.redis_url, format!("api-{}", std::process::id()))
            .expect("Failed to initialize job queue"),
    );
    queue
        .health_check()
        .await
        .expect("Failed to reach Redis");

    tracing::info!(staging_dir = %config.staging_dir, "Preparing staging directory");
    let blobs = Arc::new(
        LocalBlobStore::new(&config.staging_dir)
            .await
            .expect("Failed to create staging directory"),
    );

    let producer = Producer::new(blobs, store.clone(), queue.clone());
    let state = AppState::new(producer, store, queue);

    let app = routes::router(state, config.max_upload_bytes)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    tracing::info!(
        post_queue = POST_QUEUE,
        binary_queue = BINARY_QUEUE,
        "Starting media-pipeline on {}",
        config.bind_addr
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
