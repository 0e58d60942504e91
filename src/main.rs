use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{fabric_client::FabricClient, storage_service::StorageService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = Arc::new(config::AppConfig::from_env_and_args()?);

    tracing::info!(
        "Starting semantic-model-manager (data: {}, downloads: {}, bulk workers: {})",
        cfg.data_folder.display(),
        cfg.download_folder.display(),
        cfg.parallel_bulk_workers
    );

    // --- Ensure data directory exists ---
    if !fs::try_exists(&cfg.data_folder).await.unwrap_or(false) {
        fs::create_dir_all(&cfg.data_folder)
            .await
            .with_context(|| format!("creating data folder {}", cfg.data_folder.display()))?;
        tracing::info!("Created data directory at {}", cfg.data_folder.display());
    }
    if cfg.client_id.is_empty() || cfg.tenant_id.is_empty() {
        tracing::warn!("No service principal configured; remote calls will fail until one is set");
    }

    // --- Initialize core service ---
    let transport = Arc::new(FabricClient::new(&cfg).context("building HTTP client")?);
    let storage = StorageService::new(cfg.clone(), transport);

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(storage);

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
