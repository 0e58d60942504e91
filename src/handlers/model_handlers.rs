//! HTTP handlers for remote listings and semantic model operations.
//! Request bodies are plain JSON; the work is delegated to `StorageService`.

use crate::{
    errors::AppError,
    models::{
        operations::{
            ArtifactInventory, BulkReport, DownloadOutcome, DownloadStatus, DownloadedModelInfo,
            RevertReport, RevertTarget, UploadOutcome, UploadStatus,
        },
        remote::RemoteItem,
        replacement::{ReplacementStatus, ServerMappings},
    },
    services::storage_service::StorageService,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct DownloadReq {
    pub workspace_id: String,
    pub dataset_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Deserialize)]
pub struct BulkReplaceReq {
    pub workspace_id: String,
    pub dataset_ids: Vec<String>,
    #[serde(default)]
    pub server_mappings: ServerMappings,
}

#[derive(Debug, Deserialize)]
pub struct DeployReq {
    pub workspace_id: String,
    pub dataset_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceKeywordsReq {
    #[serde(default)]
    pub folder_path: String,
    #[serde(default)]
    pub server_mappings: ServerMappings,
}

#[derive(Debug, Deserialize)]
pub struct FolderReq {
    #[serde(default)]
    pub folder_path: String,
}

#[derive(Debug, Deserialize)]
pub struct RevertReq {
    #[serde(default)]
    pub models: Vec<RevertTarget>,
}

#[derive(Debug, Deserialize)]
pub struct OpenFolderReq {
    pub workspace_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReplaceKeywordsResponse {
    pub status: ReplacementStatus,
    pub workspace_id: String,
    pub semantic_model_id: String,
    pub files_updated: usize,
    pub replacements: BTreeMap<String, usize>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadedModels {
    pub models: Vec<DownloadedModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct OpenFolderResponse {
    pub success: bool,
    pub message: String,
    pub folder_path: String,
}

// --- Remote listings ---

/// `GET /workspaces`
pub async fn list_workspaces(State(service): State<StorageService>) -> Result<Json<Vec<RemoteItem>>, AppError> {
    Ok(Json(service.transport().list_workspaces().await?))
}

/// `GET /workspaces/{workspace_id}/datasets`
pub async fn list_datasets(
    State(service): State<StorageService>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<RemoteItem>>, AppError> {
    Ok(Json(service.transport().list_datasets(&workspace_id).await?))
}

/// `GET /workspaces/{workspace_id}/semantic-models`
pub async fn list_semantic_models(
    State(service): State<StorageService>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<RemoteItem>>, AppError> {
    Ok(Json(service.transport().list_semantic_models(&workspace_id).await?))
}

/// `GET /workspaces/{workspace_id}/reports`
pub async fn list_reports(
    State(service): State<StorageService>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<RemoteItem>>, AppError> {
    Ok(Json(service.transport().list_reports(&workspace_id).await?))
}

// --- Download ---

/// `GET /workspaces/{workspace_id}/semantic-models/{semantic_model_id}/download`
pub async fn download_semantic_model(
    State(service): State<StorageService>,
    Path((workspace_id, semantic_model_id)): Path<(String, String)>,
) -> (StatusCode, Json<DownloadOutcome>) {
    let outcome = service.download(&workspace_id, &semantic_model_id).await;
    let status = if outcome.status == DownloadStatus::Failed {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(outcome))
}

/// `POST /semantic-models/download`
pub async fn download_semantic_models(
    State(service): State<StorageService>,
    Json(req): Json<DownloadReq>,
) -> Json<Vec<DownloadOutcome>> {
    Json(
        service
            .download_many(&req.workspace_id, &req.dataset_ids, req.create_backup)
            .await,
    )
}

// --- Edit / upload ---

/// `POST /semantic-models/bulk-replace`
pub async fn bulk_replace(
    State(service): State<StorageService>,
    Json(req): Json<BulkReplaceReq>,
) -> Result<Json<BulkReport>, AppError> {
    if req.server_mappings.is_empty() {
        return Err(AppError::bad_request("server_mappings is required"));
    }
    Ok(Json(
        service
            .bulk_replace(&req.workspace_id, &req.dataset_ids, &req.server_mappings)
            .await,
    ))
}

/// `POST /workspaces/{workspace_id}/semantic-models/{semantic_model_id}/replace-keywords`
pub async fn replace_keywords(
    State(service): State<StorageService>,
    Path((workspace_id, semantic_model_id)): Path<(String, String)>,
    Json(req): Json<ReplaceKeywordsReq>,
) -> Result<Response, AppError> {
    if req.folder_path.is_empty() {
        return Err(AppError::bad_request("folder_path is required"));
    }
    if req.server_mappings.is_empty() {
        return Err(AppError::bad_request("server_mappings is required"));
    }

    let report = service
        .replace_in_folder(&req.folder_path, &req.server_mappings)
        .await?;
    let status = if report.status.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let body = ReplaceKeywordsResponse {
        status: report.status,
        workspace_id,
        semantic_model_id,
        files_updated: report.files_updated,
        replacements: report.replacements,
        error: report.error,
    };
    Ok((status, Json(body)).into_response())
}

/// `POST /semantic-models/validate-folder`
///
/// 200 with the report when the folder is complete, 400 with the report
/// when it is not.
pub async fn validate_folder(
    State(service): State<StorageService>,
    Json(req): Json<FolderReq>,
) -> Result<Response, AppError> {
    if req.folder_path.is_empty() {
        return Err(AppError::bad_request("folder_path is required"));
    }
    let report = service.validate_folder(&req.folder_path).await?;
    let status = if report.valid {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(report)).into_response())
}

/// `POST /workspaces/{workspace_id}/semantic-models/{semantic_model_id}/upload`
pub async fn upload_semantic_model(
    State(service): State<StorageService>,
    Path((workspace_id, semantic_model_id)): Path<(String, String)>,
    Json(req): Json<FolderReq>,
) -> (StatusCode, Json<UploadOutcome>) {
    let outcome = if req.folder_path.is_empty() {
        UploadOutcome {
            status: UploadStatus::ValidationFailed,
            workspace_id,
            semantic_model_id,
            model_name: None,
            parts_uploaded: 0,
            error: Some("folder_path is required".into()),
            validation_errors: None,
        }
    } else {
        service
            .upload(&workspace_id, &semantic_model_id, &req.folder_path)
            .await
    };

    let status = match outcome.status {
        UploadStatus::Success => StatusCode::OK,
        UploadStatus::ValidationFailed => StatusCode::BAD_REQUEST,
        UploadStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(outcome))
}

/// `POST /semantic-models/deploy`
pub async fn deploy(State(service): State<StorageService>, Json(req): Json<DeployReq>) -> Json<BulkReport> {
    Json(service.deploy(&req.workspace_id, &req.dataset_ids).await)
}

/// `POST /semantic-models/revert`
pub async fn revert(
    State(service): State<StorageService>,
    Json(req): Json<RevertReq>,
) -> Result<Json<RevertReport>, AppError> {
    Ok(Json(service.revert(&req.models).await?))
}

// --- Local inventory ---

/// `GET /artifacts/downloaded`
pub async fn list_downloaded_artifacts(
    State(service): State<StorageService>,
) -> Result<Json<ArtifactInventory>, AppError> {
    Ok(Json(service.list_downloaded_artifacts().await?))
}

/// `GET /workspaces/{workspace_id}/downloaded-models`
pub async fn list_downloaded_models(
    State(service): State<StorageService>,
    Path(workspace_id): Path<String>,
) -> Result<Json<DownloadedModels>, AppError> {
    let models = service.list_downloaded_models(&workspace_id).await?;
    Ok(Json(DownloadedModels { models }))
}

/// `POST /artifacts/{artifact_id}/open-folder`
pub async fn open_artifact_folder(
    State(service): State<StorageService>,
    Path(artifact_id): Path<String>,
    Json(req): Json<OpenFolderReq>,
) -> Result<Json<OpenFolderResponse>, AppError> {
    let workspace_id = req
        .workspace_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("workspace_id is required"))?;
    let folder = service.open_artifact_folder(&workspace_id, &artifact_id).await?;
    Ok(Json(opened(folder)))
}

/// `POST /workspaces/{workspace_id}/open-folder`
pub async fn open_workspace_folder(
    State(service): State<StorageService>,
    Path(workspace_id): Path<String>,
) -> Result<Json<OpenFolderResponse>, AppError> {
    let folder = service.open_workspace_folder(&workspace_id).await?;
    Ok(Json(opened(folder)))
}

fn opened(folder: std::path::PathBuf) -> OpenFolderResponse {
    OpenFolderResponse {
        success: true,
        message: "Folder opened successfully".into(),
        folder_path: folder.display().to_string(),
    }
}
