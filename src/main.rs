use anyhow::{Context, Result, bail};
use axum::Router;
use resize_gateway::{
    config::{AppConfig, Maintenance, StorageBackend},
    routes,
    services::{
        image_service::ImageTransformer,
        resize_service::{PipelineSettings, ResizeService},
        s3_storage::S3StorageService,
        storage_service::{LocalStorageService, ObjectStore},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + maintenance flags ---
    let (cfg, maintenance) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting resize-gateway with config: {:?}", cfg);

    // --- Initialize storage backend ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        StorageBackend::S3 => {
            if maintenance.is_requested() {
                bail!("--migrate and --import require the local storage backend");
            }
            Arc::new(S3StorageService::from_env().await)
        }
        StorageBackend::Local => {
            let local = open_local_storage(&cfg).await?;
            if maintenance.is_requested() {
                run_maintenance(&local, &cfg.bucket, &maintenance).await?;
                return Ok(()); // exit after maintenance
            }
            Arc::new(local)
        }
    };

    // --- Initialize core service ---
    let transformer = Arc::new(ImageTransformer::new(cfg.resize_fit, cfg.jpeg_quality));
    let service = ResizeService::new(
        store,
        transformer,
        PipelineSettings {
            bucket: cfg.bucket.clone(),
            base_url: cfg.base_url.clone(),
            format_mode: cfg.format_mode,
            storage_class: cfg.storage_class.clone(),
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

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

/// Open the SQLite metadata pool and make sure the payload directory exists.
async fn open_local_storage(cfg: &AppConfig) -> Result<LocalStorageService> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Connecting to SQLite at {:?}", options.get_filename());

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;

    Ok(LocalStorageService::new(Arc::new(db), &cfg.storage_dir))
}

async fn run_maintenance(
    store: &LocalStorageService,
    bucket: &str,
    maintenance: &Maintenance,
) -> Result<()> {
    if maintenance.migrate {
        LocalStorageService::run_migrations(&store.db).await?;
        tracing::info!("Database migration complete.");
    }
    for path in &maintenance.imports {
        let meta = store
            .import_original(bucket, path)
            .await
            .with_context(|| format!("importing {}", path.display()))?;
        tracing::info!(
            key = %meta.key,
            size = meta.size_bytes,
            content_type = ?meta.content_type,
            "Imported original"
        );
    }
    Ok(())
}
