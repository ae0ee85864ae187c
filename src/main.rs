//! Amargo - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use amargo::api::{self, AppState};
use amargo::artifacts::ArtifactStore;
use amargo::background::TaskPool;
use amargo::cache::CacheEngine;
use amargo::config::{Config, ReposConfig};
use amargo::error::Result;
use amargo::evict::Evictor;
use amargo::meta::{MetaStore, PgMetaStore};
use amargo::storage::filesystem::FilesystemBlobs;
use amargo::storage::s3::{S3Blobs, S3Config};
use amargo::storage::Blobs;
use amargo::upstream::UpstreamClient;
use amargo::{bootstrap, db, telemetry, AppError};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    telemetry::init_tracing();

    let config = Config::from_env()?;
    tracing::info!("Starting amargo");

    let db_pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations complete");

    let blobs: Arc<dyn Blobs> = match config.storage_backend.as_str() {
        "filesystem" => {
            tokio::fs::create_dir_all(&config.storage_path).await?;
            Arc::new(FilesystemBlobs::new(config.storage_path.clone()))
        }
        "s3" => {
            let s3_config = S3Config::new(
                config.s3_bucket.clone().unwrap_or_default(),
                config
                    .s3_region
                    .clone()
                    .unwrap_or_else(|| "us-east-1".to_string()),
                config.s3_endpoint.clone(),
                None,
            );
            Arc::new(S3Blobs::new(s3_config)?)
        }
        other => {
            return Err(AppError::Config(format!(
                "Unknown storage backend: {}",
                other
            )))
        }
    };

    let repos = ReposConfig::load(&config.repos_config_path)?;

    let meta: Arc<dyn MetaStore> = Arc::new(PgMetaStore::new(db_pool));
    bootstrap::sync_repositories(meta.as_ref(), &repos).await?;

    let tasks = TaskPool::new(4, config.background_queue_size);
    let artifacts = Arc::new(ArtifactStore::new(meta.clone(), blobs.clone(), tasks.clone()));
    let cache = Arc::new(CacheEngine::new(
        meta.clone(),
        artifacts.clone(),
        Duration::from_secs(config.store_timeout_secs),
    ));

    // Eviction runs one pass at startup, then on the configured interval
    let evictor = Evictor::new(
        meta.clone(),
        blobs.clone(),
        Duration::from_secs(config.eviction_interval_secs),
        config.eviction_batch_size,
    );
    tokio::spawn(evictor.run());

    let state = Arc::new(AppState {
        config: config.clone(),
        repos,
        meta,
        blobs,
        artifacts,
        cache,
        upstream: UpstreamClient::new()?,
        tasks,
    });

    let app = Router::new()
        .merge(api::routes::create_router(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
