//! Defines routes for the semantic model manager API.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET  /health`, `GET /readyz`, `GET /config`
//!
//! - **Remote listings** (Power BI / Fabric)
//!   - `GET  /workspaces`
//!   - `GET  /workspaces/{workspace_id}/datasets`
//!   - `GET  /workspaces/{workspace_id}/semantic-models`
//!   - `GET  /workspaces/{workspace_id}/reports`
//!
//! - **Model operations**
//!   - `GET  /workspaces/{workspace_id}/semantic-models/{semantic_model_id}/download`
//!   - `POST /workspaces/{workspace_id}/semantic-models/{semantic_model_id}/replace-keywords`
//!   - `POST /workspaces/{workspace_id}/semantic-models/{semantic_model_id}/upload`
//!   - `POST /semantic-models/{download,bulk-replace,deploy,validate-folder,revert}`
//!
//! - **Local inventory**
//!   - `GET  /artifacts/downloaded`
//!   - `GET  /workspaces/{workspace_id}/downloaded-models`
//!   - `POST /artifacts/{artifact_id}/open-folder`
//!   - `POST /workspaces/{workspace_id}/open-folder`

use crate::{
    handlers::{
        health_handlers::{health, readyz, show_config},
        model_handlers::{
            bulk_replace, deploy, download_semantic_model, download_semantic_models, list_datasets,
            list_downloaded_artifacts, list_downloaded_models, list_reports, list_semantic_models,
            list_workspaces, open_artifact_folder, open_workspace_folder, replace_keywords, revert,
            upload_semantic_model, validate_folder,
        },
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/config", get(show_config))
        // Remote listings
        .route("/workspaces", get(list_workspaces))
        .route("/workspaces/{workspace_id}/datasets", get(list_datasets))
        .route("/workspaces/{workspace_id}/semantic-models", get(list_semantic_models))
        .route("/workspaces/{workspace_id}/reports", get(list_reports))
        // Single model
        .route(
            "/workspaces/{workspace_id}/semantic-models/{semantic_model_id}/download",
            get(download_semantic_model),
        )
        .route(
            "/workspaces/{workspace_id}/semantic-models/{semantic_model_id}/replace-keywords",
            post(replace_keywords),
        )
        .route(
            "/workspaces/{workspace_id}/semantic-models/{semantic_model_id}/upload",
            post(upload_semantic_model),
        )
        // Bulk
        .route("/semantic-models/download", post(download_semantic_models))
        .route("/semantic-models/bulk-replace", post(bulk_replace))
        .route("/semantic-models/deploy", post(deploy))
        .route("/semantic-models/validate-folder", post(validate_folder))
        .route("/semantic-models/revert", post(revert))
        // Local inventory
        .route("/artifacts/downloaded", get(list_downloaded_artifacts))
        .route("/artifacts/{artifact_id}/open-folder", post(open_artifact_folder))
        .route(
            "/workspaces/{workspace_id}/downloaded-models",
            get(list_downloaded_models),
        )
        .route("/workspaces/{workspace_id}/open-folder", post(open_workspace_folder))
}
