use anyhow::Result;
use axum::Router;
use file_gateway::{
    blob::{BlobAdapter, LocalBlobAdapter, S3BlobAdapter},
    catalog::Catalog,
    config::{AppConfig, BlobBackend},
    handlers::AppState,
    routes::routes::routes,
    services::FileService,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        backend = ?cfg.blob_backend,
        database_url = %cfg.database_url,
        "Starting file-gateway"
    );

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    let catalog = Catalog::new(pool);

    // --- Schema ---
    catalog.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Blob backend ---
    let mut links = None;
    let blob: Arc<dyn BlobAdapter> = match cfg.blob_backend {
        BlobBackend::Local => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            let secret = match &cfg.presign_secret {
                Some(secret) => secret.clone(),
                None => {
                    tracing::warn!(
                        "FILE_GATEWAY_PRESIGN_SECRET not set; presigned links will not survive a restart"
                    );
                    Uuid::new_v4().to_string()
                }
            };
            let local = Arc::new(LocalBlobAdapter::new(
                &cfg.storage_dir,
                cfg.public_url.clone(),
                secret.into_bytes(),
            )?);
            links = Some(local.clone());
            local as Arc<dyn BlobAdapter>
        }
        BlobBackend::S3 => Arc::new(S3BlobAdapter::new(cfg.s3.clone()).await?),
    };

    // --- Build router ---
    let mut state = AppState::new(FileService::new(blob, catalog));
    if let Some(local) = links {
        state = state.with_links(local);
    }
    let app: Router = routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
