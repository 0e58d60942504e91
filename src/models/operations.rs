//! Result records of the orchestrated operations (download, bulk runs,
//! revert, upload, local inventory).

use crate::models::{artifact::ArtifactMetadata, replacement::ReplacementStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Fetched and written locally.
    Downloaded,
    /// A definition was already present; it was left in place.
    Exists,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DownloadOutcome {
    pub workspace_id: String,
    pub semantic_model_id: String,
    pub status: DownloadStatus,
    pub folder: Option<String>,
    pub backup: Option<String>,
    pub files_saved: usize,
    pub metadata: Option<ArtifactMetadata>,
    pub error: Option<String>,
}

/// Per-model line of a bulk replace or deploy run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BulkModelResult {
    pub dataset_id: String,
    pub status: String,
    pub error: Option<String>,
    #[serde(default)]
    pub files_updated: usize,
    #[serde(default)]
    pub replacements: BTreeMap<String, usize>,
}

impl BulkModelResult {
    pub fn failed(dataset_id: &str, error: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            status: "failed".into(),
            error: Some(error.into()),
            files_updated: 0,
            replacements: BTreeMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BulkReport {
    pub total_models: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub models: Vec<BulkModelResult>,
    pub replacements_summary: BTreeMap<String, usize>,
}

impl BulkReport {
    /// Aggregate per-model lines; `success` decides which bucket a line counts in.
    pub fn collect(
        total_models: usize,
        models: Vec<BulkModelResult>,
        success: impl Fn(&BulkModelResult) -> bool,
    ) -> Self {
        let mut successful = 0;
        let mut replacements_summary = BTreeMap::new();
        for model in &models {
            if success(model) {
                successful += 1;
                for (key, count) in &model.replacements {
                    *replacements_summary.entry(key.clone()).or_insert(0) += count;
                }
            }
        }
        Self {
            total_models,
            processed: models.len(),
            successful,
            failed: models.len() - successful,
            models,
            replacements_summary,
        }
    }
}

/// True when a bulk-replace line counts as successful.
pub fn replace_succeeded(model: &BulkModelResult) -> bool {
    model.status == status_str(ReplacementStatus::Updated)
        || model.status == status_str(ReplacementStatus::NoChanges)
}

pub fn status_str(status: ReplacementStatus) -> &'static str {
    match status {
        ReplacementStatus::Updated => "updated",
        ReplacementStatus::NoChanges => "no_changes",
        ReplacementStatus::Failed => "failed",
    }
}

/// One entry of a revert request; both ids are required but checked per entry.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct RevertTarget {
    pub workspace_id: Option<String>,
    pub semantic_model_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RevertResult {
    pub workspace_id: Option<String>,
    pub semantic_model_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RevertReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<RevertResult>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Success,
    Failed,
    ValidationFailed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Failed => "failed",
            UploadStatus::ValidationFailed => "validation_failed",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadOutcome {
    pub status: UploadStatus,
    pub workspace_id: String,
    pub semantic_model_id: String,
    pub model_name: Option<String>,
    pub parts_uploaded: usize,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

/// One artifact found in the local data folder.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DownloadedArtifact {
    pub artifact_id: String,
    pub artifact_name: String,
    pub workspace_id: String,
    pub workspace_name: String,
    pub last_updated: Option<String>,
    pub download_timestamp: Option<String>,
    pub definition_format: Option<String>,
    pub files_count: usize,
    pub folder_path: String,
    pub has_backup: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WorkspaceArtifacts {
    pub workspace_id: String,
    pub workspace_name: String,
    pub semantic_models: Vec<DownloadedArtifact>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArtifactInventory {
    pub total: usize,
    pub workspaces: Vec<WorkspaceArtifacts>,
}

/// A model folder found under the download folder.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DownloadedModelInfo {
    pub workspace: String,
    pub model_name: String,
    pub path: String,
    pub relative_path: String,
}
