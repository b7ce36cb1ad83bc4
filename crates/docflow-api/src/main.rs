//! docflow-api: HTTP server for the document ingestion pipeline.
//!
//! Hosts the upload, status, and webhook endpoints and runs the
//! background ingestion worker in-process against the same stores.

mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use docflow_core::defaults;
use docflow_db::{Database, FilesystemBackend, PoolConfig, StorageBackend};
use docflow_jobs::{HashEmbedder, IngestPipeline, IngestWorker, Stores, WorkerConfig};
use docflow_parse::{OrchestratorConfig, ParseClient, ParserOrchestrator, QueueConfig, RequestQueue};

use crate::state::AppState;

/// Generates time-ordered UUIDv7 request correlation ids, so request
/// ids sort chronologically in logs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// CORS origin whitelist from `CORS_ALLOWED_ORIGINS` (comma-separated).
fn parse_allowed_origins() -> Vec<HeaderValue> {
    std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string())
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect()
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api/v1/documents",
            post(handlers::documents::upload_document),
        )
        .route(
            "/api/v1/documents/:id/chunks",
            get(handlers::documents::list_document_chunks),
        )
        .route(
            "/api/v1/chunks/:id/embedding",
            get(handlers::documents::get_chunk_embedding),
        )
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job_status))
        .route("/api/v1/jobs/:id/cancel", post(handlers::jobs::cancel_job))
        .route(
            "/api/v1/webhooks/parse/:job_id",
            post(handlers::webhook::receive_parse_webhook),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parse_allowed_origins()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]),
        )
        // Uploads arrive base64-encoded inside JSON; allow for the
        // 4/3 expansion plus envelope overhead.
        .layer(RequestBodyLimitLayer::new(defaults::UPLOAD_MAX_BYTES * 2))
        .with_state(app_state)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter (default: "docflow_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docflow_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("docflow-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
        None
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/docflow".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    // Connect to database and run pending migrations
    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");
    db.migrate().await?;
    info!("Database migrations complete");

    // Object store, with a write/read round-trip before accepting traffic
    let storage_path = std::env::var("OBJECT_STORE_PATH")
        .unwrap_or_else(|_| "/var/lib/docflow/objects".to_string());
    let backend = FilesystemBackend::new(&storage_path);
    backend
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("object store validation failed: {}", e))?;
    let storage: Arc<dyn StorageBackend> = Arc::new(backend);
    info!("Object store initialized at {}", storage_path);

    // Parsing-service client behind the shared request queue
    let parse_client = ParseClient::from_env()?;
    let queue = Arc::new(RequestQueue::new(QueueConfig::default()));
    let parser = Arc::new(ParserOrchestrator::new(
        Arc::new(parse_client),
        queue,
        OrchestratorConfig::from_env(),
    ));

    let stores = Stores::postgres(&db, storage);
    let pipeline = Arc::new(IngestPipeline::new(
        stores.clone(),
        parser.clone(),
        Arc::new(HashEmbedder::default()),
    ));

    // Background ingestion worker
    let worker_config = WorkerConfig::from_env();
    let worker_handle = if worker_config.enabled {
        info!(
            max_concurrent = worker_config.max_concurrent_jobs,
            poll_interval_ms = worker_config.poll_interval_ms,
            "Starting ingestion worker"
        );
        Some(IngestWorker::new(pipeline, worker_config).start())
    } else {
        info!("Ingestion worker disabled");
        None
    };

    let app = build_router(AppState::new(stores, parser));

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight stages finish before exiting
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.shutdown().await {
            tracing::warn!("Worker shutdown error: {}", e);
        }
    }

    Ok(())
}
