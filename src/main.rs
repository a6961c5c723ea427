use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, sync::Arc};
use thumbnailer::{
    config::AppConfig,
    routes,
    services::{storage_service::LocalStore, thumbnail_service::ThumbnailService},
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting thumbnailer with config: {:?}", cfg);

    // --- Ensure thumbnail directory exists ---
    let thumbnail_dir = cfg.thumbnail_dir();
    if !thumbnail_dir.exists() {
        fs::create_dir_all(&thumbnail_dir)?;
        tracing::info!("Created thumbnail directory at {}", thumbnail_dir.display());
    }

    // --- Initialize core service ---
    let store = LocalStore::new(&thumbnail_dir);
    let service = ThumbnailService::new(Arc::new(store), cfg.decode_limits());

    // --- Build router ---
    let app: Router =
        routes::routes::routes(&thumbnail_dir, cfg.max_upload_bytes).with_state(service);

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
