//! src/services/storage_service.rs
//!
//! StorageService orchestrates the storage core and the remote transport:
//! downloading definitions into the artifact tree, bulk keyword replacement,
//! upload and deploy, revert from backup, and the local inventory. It is
//! cheap to clone and shared as router state.

use crate::{
    config::AppConfig,
    models::{
        artifact::{ArtifactMetadata, BACKUP_INFO_FILE_NAME, METADATA_FILE_NAME, timestamp},
        definition::Definition,
        operations::{
            ArtifactInventory, BulkModelResult, BulkReport, DownloadOutcome, DownloadStatus,
            DownloadedArtifact, DownloadedModelInfo, RevertReport, RevertResult, RevertTarget,
            UploadOutcome, UploadStatus, WorkspaceArtifacts, replace_succeeded, status_str,
        },
        replacement::{ReplacementReport, ServerMappings},
        validation::{FOLDER_NOT_FOUND, ValidationReport},
    },
    services::{
        artifact_locks::ArtifactLocks,
        backup_manager, definition_codec,
        error::{SideEffectError, SideEffectResult, StorageError, StorageResult},
        fabric_client::ModelTransport,
        folder_validator, keyword_replacer, metadata_store,
        path_resolver::{self, PathResolver},
        tree,
    },
};
use futures::{StreamExt, stream};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};

/// Marker file whose presence means a definition was already downloaded.
const DEFINITION_MARKER: &str = "definition.pbism";
const DEFINITION_DIR: &str = "definition";
const MISSING_DEFINITION: &str = "Definition folder not found. Download first.";

#[derive(Clone)]
pub struct StorageService {
    config: Arc<AppConfig>,
    resolver: PathResolver,
    transport: Arc<dyn ModelTransport>,
    locks: ArtifactLocks,
}

impl StorageService {
    pub fn new(config: Arc<AppConfig>, transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            resolver: PathResolver::from_config(&config),
            config,
            transport,
            locks: ArtifactLocks::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn ModelTransport {
        self.transport.as_ref()
    }

    pub fn data_folder(&self) -> &Path {
        self.resolver.base()
    }

    fn artifact_type(&self) -> &str {
        &self.config.semantic_models_folder_name
    }

    /// Live and backup folders for externally supplied ids, both checked to
    /// stay inside the data folder.
    async fn artifact_locations(
        &self,
        workspace_id: &str,
        model_id: &str,
        workspace_name: Option<&str>,
    ) -> StorageResult<(PathBuf, PathBuf)> {
        path_resolver::ensure_segment_safe(workspace_id)?;
        path_resolver::ensure_segment_safe(model_id)?;
        let live = self
            .resolver
            .artifact_path(workspace_id, self.artifact_type(), model_id, workspace_name);
        let backup = self
            .resolver
            .backup_path(workspace_id, self.artifact_type(), model_id, workspace_name);
        Ok((
            self.resolver.ensure_within_base(&live).await?,
            self.resolver.ensure_within_base(&backup).await?,
        ))
    }

    /// Workspace display name for the folder segment when the layout is name
    /// based. `None` keeps the workspace id segment.
    async fn workspace_folder_name(&self, workspace_id: &str) -> Option<String> {
        if self.config.use_workspace_id_in_path {
            return None;
        }
        match self.transport.workspace_info(workspace_id).await {
            Ok(item) => Some(item.display_name().to_string()),
            Err(err) => {
                warn!("could not look up workspace {}: {}", workspace_id, err);
                None
            }
        }
    }

    async fn snapshot(&self, source: &Path, backup: &Path) -> SideEffectResult<PathBuf> {
        backup_manager::create(source, backup)
            .await
            .map_err(|err| SideEffectError::new("backup", err))
    }

    // --- Download ---

    /// Download one model, looking up its display name and its workspace's.
    pub async fn download(&self, workspace_id: &str, model_id: &str) -> DownloadOutcome {
        let model_name = match self.transport.model_info(workspace_id, model_id).await {
            Ok(item) => item.display_name().to_string(),
            Err(err) => {
                warn!("could not look up model {}: {}", model_id, err);
                model_id.to_string()
            }
        };
        let workspace_name = match self.transport.workspace_info(workspace_id).await {
            Ok(item) => item.display_name().to_string(),
            Err(err) => {
                warn!("could not look up workspace {}: {}", workspace_id, err);
                workspace_id.to_string()
            }
        };
        self.download_named(workspace_id, &workspace_name, model_id, &model_name, true)
            .await
    }

    /// Download several models of one workspace, named by their ids.
    pub async fn download_many(
        &self,
        workspace_id: &str,
        model_ids: &[String],
        create_backup: bool,
    ) -> Vec<DownloadOutcome> {
        let workspace_name = self
            .workspace_folder_name(workspace_id)
            .await
            .unwrap_or_else(|| workspace_id.to_string());
        let workspace_name = workspace_name.as_str();

        stream::iter(model_ids.iter().cloned())
            .map(move |id| async move {
                self.download_named(workspace_id, workspace_name, &id, &id, create_backup)
                    .await
            })
            .buffered(self.config.parallel_bulk_workers)
            .collect()
            .await
    }

    pub async fn download_named(
        &self,
        workspace_id: &str,
        workspace_name: &str,
        model_id: &str,
        model_name: &str,
        create_backup: bool,
    ) -> DownloadOutcome {
        match self
            .try_download(workspace_id, workspace_name, model_id, model_name, create_backup)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("download of {}/{} failed: {}", workspace_id, model_id, err);
                DownloadOutcome {
                    workspace_id: workspace_id.to_string(),
                    semantic_model_id: model_id.to_string(),
                    status: DownloadStatus::Failed,
                    folder: None,
                    backup: None,
                    files_saved: 0,
                    metadata: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn try_download(
        &self,
        workspace_id: &str,
        workspace_name: &str,
        model_id: &str,
        model_name: &str,
        create_backup: bool,
    ) -> StorageResult<DownloadOutcome> {
        let (folder, backup) = self
            .artifact_locations(workspace_id, model_id, Some(workspace_name))
            .await?;
        let _guard = self.locks.lock(&folder).await;
        let backups_enabled = create_backup && self.config.enable_auto_backup;

        if fs::try_exists(folder.join(DEFINITION_MARKER)).await.unwrap_or(false) {
            if backups_enabled {
                if let Err(err) = self.snapshot(&folder, &backup).await {
                    warn!("{}", err);
                }
            }
            let metadata = metadata_store::read(&folder).await;
            debug!("{} already downloaded, not refetching", folder.display());
            return Ok(DownloadOutcome {
                workspace_id: workspace_id.to_string(),
                semantic_model_id: model_id.to_string(),
                status: DownloadStatus::Exists,
                folder: Some(folder.display().to_string()),
                backup: self.existing_backup(&backup).await,
                files_saved: metadata.as_ref().map_or(0, |m| m.files_count),
                metadata,
                error: None,
            });
        }

        let definition = self.transport.fetch_definition(workspace_id, model_id).await?;
        let written = definition_codec::materialize(&definition, &folder).await?;

        let mut metadata = ArtifactMetadata::for_download(
            workspace_id,
            workspace_name,
            model_id,
            model_name,
            definition.format_or(self.config.definition_format),
            written.len(),
        );
        if self.config.store_artifact_metadata {
            if let Err(err) = metadata_store::write(&folder, &mut metadata).await {
                warn!("{}", SideEffectError::new("metadata write", err));
            }
        }
        if backups_enabled {
            if let Err(err) = self.snapshot(&folder, &backup).await {
                warn!("{}", err);
            }
        }

        info!(
            "downloaded {} ({} files) into {}",
            model_id,
            written.len(),
            folder.display()
        );
        Ok(DownloadOutcome {
            workspace_id: workspace_id.to_string(),
            semantic_model_id: model_id.to_string(),
            status: DownloadStatus::Downloaded,
            folder: Some(folder.display().to_string()),
            backup: self.existing_backup(&backup).await,
            files_saved: written.len(),
            metadata: Some(metadata),
            error: None,
        })
    }

    async fn existing_backup(&self, backup: &Path) -> Option<String> {
        backup_manager::exists(backup)
            .await
            .then(|| backup.display().to_string())
    }

    // --- Keyword replacement ---

    /// Apply `mappings` to the downloaded copy of every listed model.
    pub async fn bulk_replace(
        &self,
        workspace_id: &str,
        model_ids: &[String],
        mappings: &ServerMappings,
    ) -> BulkReport {
        let folder_name = self.workspace_folder_name(workspace_id).await;
        let folder_name = folder_name.as_deref();

        let models: Vec<_> = stream::iter(model_ids.iter().cloned())
            .map(move |id| async move {
                self.replace_model(workspace_id, folder_name, &id, mappings)
                    .await
            })
            .buffered(self.config.parallel_bulk_workers)
            .collect()
            .await;
        let report = BulkReport::collect(model_ids.len(), models, replace_succeeded);
        info!(
            "bulk replace in {}: {} succeeded, {} failed",
            workspace_id, report.successful, report.failed
        );
        report
    }

    async fn replace_model(
        &self,
        workspace_id: &str,
        folder_name: Option<&str>,
        model_id: &str,
        mappings: &ServerMappings,
    ) -> BulkModelResult {
        let (folder, backup) = match self.existing_artifact(workspace_id, folder_name, model_id).await {
            Ok(locations) => locations,
            Err(err) => return BulkModelResult::failed(model_id, err.to_string()),
        };
        let _guard = self.locks.lock(&folder).await;

        if self.config.backup_on_update && self.config.enable_auto_backup {
            if let Err(err) = self.snapshot(&folder, &backup).await {
                warn!("{}", err);
            }
        }

        let report = keyword_replacer::replace(&folder, mappings, self.config.store_artifact_metadata).await;
        BulkModelResult {
            dataset_id: model_id.to_string(),
            status: status_str(report.status).to_string(),
            error: report.error,
            files_updated: report.files_updated,
            replacements: report.replacements,
        }
    }

    /// Live and backup folders of a model that must already be downloaded.
    async fn existing_artifact(
        &self,
        workspace_id: &str,
        folder_name: Option<&str>,
        model_id: &str,
    ) -> StorageResult<(PathBuf, PathBuf)> {
        let (folder, backup) = self
            .artifact_locations(workspace_id, model_id, folder_name)
            .await?;
        if !fs::metadata(&folder).await.is_ok_and(|m| m.is_dir()) {
            return Err(StorageError::NotFound(MISSING_DEFINITION.into()));
        }
        Ok((folder, backup))
    }

    /// Resolve a user supplied model folder against the download folder and
    /// then the data folder; it must stay inside one of them.
    pub async fn resolve_model_folder(&self, input: &str) -> StorageResult<PathBuf> {
        let download = &self.config.download_folder;
        let data = self.resolver.base();
        let resolved = path_resolver::resolve_folder(input, download, data).await?;

        match path_resolver::ensure_within(&resolved, download).await {
            Ok(inside) => Ok(inside),
            Err(_) => path_resolver::ensure_within(&resolved, data).await,
        }
    }

    /// Replace server names in an explicitly named model folder.
    pub async fn replace_in_folder(
        &self,
        folder_input: &str,
        mappings: &ServerMappings,
    ) -> StorageResult<ReplacementReport> {
        let folder = self.resolve_model_folder(folder_input).await?;
        let _guard = self.locks.lock(&folder).await;
        Ok(keyword_replacer::replace(&folder, mappings, self.config.store_artifact_metadata).await)
    }

    // --- Validation, upload, deploy ---

    pub async fn validate_folder(&self, folder_input: &str) -> StorageResult<ValidationReport> {
        match self.resolve_model_folder(folder_input).await {
            Ok(folder) => Ok(folder_validator::validate(&folder).await),
            Err(StorageError::NotFound(_)) => Ok(ValidationReport {
                valid: false,
                missing_files: vec![FOLDER_NOT_FOUND.to_string()],
                folder_path: folder_input.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    /// Validate a user supplied folder and submit it as the definition of
    /// `model_id`.
    pub async fn upload(&self, workspace_id: &str, model_id: &str, folder_input: &str) -> UploadOutcome {
        let outcome = UploadOutcome {
            status: UploadStatus::Failed,
            workspace_id: workspace_id.to_string(),
            semantic_model_id: model_id.to_string(),
            model_name: None,
            parts_uploaded: 0,
            error: None,
            validation_errors: None,
        };

        match self.resolve_model_folder(folder_input).await {
            Ok(folder) => self.upload_folder(workspace_id, model_id, &folder).await,
            Err(err @ StorageError::NotFound(_)) => UploadOutcome {
                status: UploadStatus::ValidationFailed,
                error: Some(err.to_string()),
                validation_errors: Some(vec![FOLDER_NOT_FOUND.to_string()]),
                ..outcome
            },
            Err(err) => UploadOutcome {
                error: Some(err.to_string()),
                ..outcome
            },
        }
    }

    async fn upload_folder(&self, workspace_id: &str, model_id: &str, folder: &Path) -> UploadOutcome {
        let mut outcome = UploadOutcome {
            status: UploadStatus::Failed,
            workspace_id: workspace_id.to_string(),
            semantic_model_id: model_id.to_string(),
            model_name: None,
            parts_uploaded: 0,
            error: None,
            validation_errors: None,
        };

        let _guard = self.locks.lock(folder).await;
        let report = folder_validator::validate(folder).await;
        if !report.valid {
            warn!("{} failed validation: {:?}", folder.display(), report.missing_files);
            outcome.status = UploadStatus::ValidationFailed;
            outcome.error = Some(StorageError::ValidationFailed(report.missing_files.clone()).to_string());
            outcome.validation_errors = Some(report.missing_files);
            return outcome;
        }

        outcome.model_name = Some(match self.transport.model_info(workspace_id, model_id).await {
            Ok(item) => item.display_name().to_string(),
            Err(_) => model_id.to_string(),
        });

        let result = async {
            let mut definition = definition_codec::dematerialize(folder, self.config.definition_format).await?;
            strip_sidecars(&mut definition);
            self.transport
                .submit_definition(workspace_id, model_id, &definition)
                .await?;
            Ok::<_, StorageError>(definition.parts.len())
        }
        .await;

        match result {
            Ok(parts) => {
                info!("uploaded {} parts from {} to {}", parts, folder.display(), model_id);
                outcome.status = UploadStatus::Success;
                outcome.parts_uploaded = parts;
            }
            Err(err) => {
                warn!("upload of {} failed: {}", model_id, err);
                outcome.error = Some(err.to_string());
            }
        }
        outcome
    }

    /// Upload the downloaded copy of every listed model.
    pub async fn deploy(&self, workspace_id: &str, model_ids: &[String]) -> BulkReport {
        let folder_name = self.workspace_folder_name(workspace_id).await;
        let folder_name = folder_name.as_deref();

        let models: Vec<_> = stream::iter(model_ids.iter().cloned())
            .map(move |id| async move {
                let folder = match self.existing_artifact(workspace_id, folder_name, &id).await {
                    Ok((folder, _)) => folder,
                    Err(err) => return BulkModelResult::failed(&id, err.to_string()),
                };
                let outcome = self.upload_folder(workspace_id, &id, &folder).await;
                BulkModelResult {
                    dataset_id: id,
                    status: outcome.status.as_str().to_string(),
                    error: outcome.error,
                    files_updated: outcome.parts_uploaded,
                    replacements: Default::default(),
                }
            })
            .buffered(self.config.parallel_bulk_workers)
            .collect()
            .await;

        BulkReport::collect(model_ids.len(), models, |m| {
            m.status == UploadStatus::Success.as_str()
        })
    }

    // --- Revert ---

    pub async fn revert(&self, targets: &[RevertTarget]) -> StorageResult<RevertReport> {
        if targets.is_empty() {
            return Err(StorageError::InvalidInput("models array is required".into()));
        }

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let error = match (&target.workspace_id, &target.semantic_model_id) {
                (Some(ws), Some(id)) if !ws.is_empty() && !id.is_empty() => {
                    self.revert_one(ws, id).await.err().map(|err| match err {
                        StorageError::NotFound(_) => "No backup found".to_string(),
                        other => other.to_string(),
                    })
                }
                _ => Some("workspace_id and semantic_model_id are required".to_string()),
            };
            results.push(RevertResult {
                workspace_id: target.workspace_id.clone(),
                semantic_model_id: target.semantic_model_id.clone(),
                status: if error.is_none() { "success" } else { "failed" }.to_string(),
                error,
            });
        }

        let successful = results.iter().filter(|r| r.error.is_none()).count();
        info!("revert: {} of {} models restored", successful, results.len());
        Ok(RevertReport {
            total: targets.len(),
            successful,
            failed: results.len() - successful,
            results,
        })
    }

    async fn revert_one(&self, workspace_id: &str, model_id: &str) -> StorageResult<()> {
        let folder_name = self.workspace_folder_name(workspace_id).await;
        let (target, backup) = self
            .artifact_locations(workspace_id, model_id, folder_name.as_deref())
            .await?;
        let _guard = self.locks.lock(&target).await;
        backup_manager::restore(&backup, &target).await
    }

    // --- Local inventory ---

    /// Every artifact folder under the data folder, grouped by workspace.
    pub async fn list_downloaded_artifacts(&self) -> StorageResult<ArtifactInventory> {
        let mut workspaces = Vec::new();
        let mut total = 0;

        for workspace_dir in tree::child_dirs(self.resolver.base()).await? {
            let workspace_id = dir_name(&workspace_dir);
            let type_dir = workspace_dir.join(self.artifact_type());
            let mut workspace_name = workspace_id.clone();
            let mut semantic_models = Vec::new();

            for model_dir in tree::child_dirs(&type_dir).await? {
                let model_id = dir_name(&model_dir);
                if model_id == self.resolver.backup_folder_name() {
                    continue;
                }
                let backup = type_dir.join(self.resolver.backup_folder_name()).join(&model_id);
                let has_backup = backup_manager::exists(&backup).await;
                let artifact = match metadata_store::read(&model_dir).await {
                    Some(meta) => {
                        workspace_name = meta.workspace_name.clone();
                        DownloadedArtifact {
                            artifact_id: meta.artifact_id,
                            artifact_name: meta.artifact_name,
                            workspace_id: meta.workspace_id,
                            workspace_name: meta.workspace_name,
                            last_updated: meta.last_updated.as_ref().map(timestamp::format),
                            download_timestamp: Some(timestamp::format(&meta.download_timestamp)),
                            definition_format: Some(meta.definition_format.to_string()),
                            files_count: meta.files_count,
                            folder_path: model_dir.display().to_string(),
                            has_backup,
                        }
                    }
                    None => DownloadedArtifact {
                        artifact_id: model_id.clone(),
                        artifact_name: model_id,
                        workspace_id: workspace_id.clone(),
                        workspace_name: workspace_id.clone(),
                        last_updated: None,
                        download_timestamp: None,
                        definition_format: None,
                        files_count: 0,
                        folder_path: model_dir.display().to_string(),
                        has_backup,
                    },
                };
                semantic_models.push(artifact);
            }

            if !semantic_models.is_empty() {
                total += semantic_models.len();
                workspaces.push(WorkspaceArtifacts {
                    workspace_id,
                    workspace_name,
                    semantic_models,
                });
            }
        }

        Ok(ArtifactInventory { total, workspaces })
    }

    /// Model folders of one workspace under the download folder.
    pub async fn list_downloaded_models(&self, workspace_id: &str) -> StorageResult<Vec<DownloadedModelInfo>> {
        path_resolver::ensure_segment_safe(workspace_id)?;
        let workspace_dir = self.config.download_folder.join(workspace_id);

        let mut models = Vec::new();
        for model_dir in tree::child_dirs(&workspace_dir).await? {
            let has_marker = fs::try_exists(model_dir.join(DEFINITION_MARKER)).await.unwrap_or(false);
            let has_definition = fs::try_exists(model_dir.join(DEFINITION_DIR)).await.unwrap_or(false);
            if !(has_marker && has_definition) {
                continue;
            }
            let model_name = dir_name(&model_dir);
            models.push(DownloadedModelInfo {
                workspace: workspace_id.to_string(),
                relative_path: format!("{workspace_id}/{model_name}"),
                path: model_dir.display().to_string(),
                model_name,
            });
        }
        Ok(models)
    }

    // --- Folder opening ---

    pub async fn open_artifact_folder(&self, workspace_id: &str, artifact_id: &str) -> StorageResult<PathBuf> {
        let folder_name = self.workspace_folder_name(workspace_id).await;
        let folder = self
            .resolver
            .validate_artifact_folder(workspace_id, self.artifact_type(), artifact_id, folder_name.as_deref())
            .await?;
        reveal(&folder)?;
        Ok(folder)
    }

    pub async fn open_workspace_folder(&self, workspace_id: &str) -> StorageResult<PathBuf> {
        let folder_name = self.workspace_folder_name(workspace_id).await;
        let folder = self
            .resolver
            .validate_workspace_folder(workspace_id, self.artifact_type(), folder_name.as_deref())
            .await?;
        reveal(&folder)?;
        Ok(folder)
    }
}

/// Sidecars describe the local copy and are never sent upstream.
fn strip_sidecars(definition: &mut Definition) {
    definition
        .parts
        .retain(|part| part.path != METADATA_FILE_NAME && part.path != BACKUP_INFO_FILE_NAME);
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Hand the folder to the platform file browser without waiting for it.
fn reveal(folder: &Path) -> StorageResult<()> {
    let program = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    Command::new(program).arg(folder).spawn()?;
    debug!("opened {} with {}", folder.display(), program);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::replacement::ReplacementStatus,
        services::test_support::{OLD_SERVER, StubTransport},
    };

    fn service(root: &Path, stub: Arc<StubTransport>) -> StorageService {
        StorageService::new(Arc::new(AppConfig::for_tests(root)), stub)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn mappings() -> ServerMappings {
        [(OLD_SERVER, "new-srv.database.windows.net")].into_iter().collect()
    }

    #[tokio::test]
    async fn download_writes_tree_metadata_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::with_models(&["m1"])));

        let outcome = svc.download("ws-1", "m1").await;

        assert_eq!(outcome.status, DownloadStatus::Downloaded, "{:?}", outcome.error);
        assert_eq!(outcome.files_saved, 4);
        let folder = PathBuf::from(outcome.folder.unwrap());
        assert!(folder.ends_with("ws-1/semantic-models/m1"));
        assert!(folder.join("definition/tables/Sales.tmdl").is_file());

        let meta = metadata_store::read(&folder).await.unwrap();
        assert_eq!(meta.artifact_name, "Model m1");
        assert_eq!(meta.workspace_name, "Sales");
        assert_eq!(meta.files_count, 4);

        let backup = PathBuf::from(outcome.backup.unwrap());
        assert!(backup.ends_with("ws-1/semantic-models/backup/m1"));
        assert!(backup.join(BACKUP_INFO_FILE_NAME).is_file());
    }

    #[tokio::test]
    async fn existing_definition_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::with_models(&["m1"]));
        let svc = service(dir.path(), stub.clone());

        svc.download_many("ws-1", &ids(&["m1"]), true).await;
        let again = svc.download_many("ws-1", &ids(&["m1"]), true).await;

        assert_eq!(again[0].status, DownloadStatus::Exists);
        assert!(again[0].backup.is_some());
        assert_eq!(stub.fetch_count(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_reported_per_model() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::with_models(&["m1"])));

        let outcomes = svc.download_many("ws-1", &ids(&["m1", "missing"]), false).await;

        assert_eq!(outcomes[0].status, DownloadStatus::Downloaded);
        assert_eq!(outcomes[0].backup, None);
        assert_eq!(outcomes[1].status, DownloadStatus::Failed);
        assert!(outcomes[1].error.is_some());
    }

    #[tokio::test]
    async fn traversal_ids_never_touch_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::with_models(&["m1"]));
        let svc = service(dir.path(), stub.clone());

        let outcome = svc.download_named("ws-1", "ws-1", "../../etc", "x", true).await;

        assert_eq!(outcome.status, DownloadStatus::Failed);
        assert!(outcome.error.unwrap().contains("invalid path"));
        assert_eq!(stub.fetch_count(), 0);
    }

    #[tokio::test]
    async fn bulk_replace_counts_and_reports_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::with_models(&["m1", "m2"])));
        svc.download_many("ws-1", &ids(&["m1", "m2"]), false).await;

        let report = svc.bulk_replace("ws-1", &ids(&["m1", "m2", "m3"]), &mappings()).await;

        assert_eq!(report.total_models, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.replacements_summary.get(OLD_SERVER), Some(&2));
        assert_eq!(report.models[2].error.as_deref(), Some(MISSING_DEFINITION));

        let again = svc.bulk_replace("ws-1", &ids(&["m1"]), &mappings()).await;
        assert_eq!(again.models[0].status, "no_changes");
        assert_eq!(again.successful, 1);
    }

    #[tokio::test]
    async fn replace_then_revert_restores_pre_edit_copy() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::with_models(&["m1"])));
        svc.download_many("ws-1", &ids(&["m1"]), false).await;
        svc.bulk_replace("ws-1", &ids(&["m1"]), &mappings()).await;

        let sales = svc.data_folder().join("ws-1/semantic-models/m1/definition/tables/Sales.tmdl");
        assert!(!fs::read_to_string(&sales).await.unwrap().contains(OLD_SERVER));

        let report = svc
            .revert(&[
                RevertTarget {
                    workspace_id: Some("ws-1".into()),
                    semantic_model_id: Some("m1".into()),
                },
                RevertTarget {
                    workspace_id: Some("ws-1".into()),
                    semantic_model_id: Some("never-downloaded".into()),
                },
                RevertTarget::default(),
            ])
            .await
            .unwrap();

        assert_eq!((report.total, report.successful, report.failed), (3, 1, 2));
        assert_eq!(report.results[1].error.as_deref(), Some("No backup found"));
        assert!(fs::read_to_string(&sales).await.unwrap().contains(OLD_SERVER));
    }

    #[tokio::test]
    async fn workspace_name_layout_is_used_by_every_operation() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::for_tests(dir.path());
        cfg.use_workspace_id_in_path = false;
        let stub = Arc::new(StubTransport::with_models(&["m1"]));
        let svc = StorageService::new(Arc::new(cfg), stub.clone());

        let outcomes = svc.download_many("ws-1", &ids(&["m1"]), true).await;
        let folder = PathBuf::from(outcomes[0].folder.clone().unwrap());
        assert!(folder.ends_with("Sales/semantic-models/m1"));
        assert!(outcomes[0].backup.as_deref().unwrap().ends_with("Sales/semantic-models/backup/m1"));

        let report = svc.bulk_replace("ws-1", &ids(&["m1"]), &mappings()).await;
        assert_eq!(report.successful, 1, "{:?}", report.models[0].error);
        let sales = folder.join("definition/tables/Sales.tmdl");
        assert!(!fs::read_to_string(&sales).await.unwrap().contains(OLD_SERVER));

        let deployed = svc.deploy("ws-1", &ids(&["m1"])).await;
        assert_eq!(deployed.successful, 1, "{:?}", deployed.models[0].error);
        assert_eq!(stub.submitted().len(), 1);

        let reverted = svc
            .revert(&[RevertTarget {
                workspace_id: Some("ws-1".into()),
                semantic_model_id: Some("m1".into()),
            }])
            .await
            .unwrap();
        assert_eq!(reverted.successful, 1, "{:?}", reverted.results[0].error);
        assert!(fs::read_to_string(&sales).await.unwrap().contains(OLD_SERVER));

        assert!(!svc.data_folder().join("ws-1").exists());
        let inventory = svc.list_downloaded_artifacts().await.unwrap();
        let listed = &inventory.workspaces[0].semantic_models[0];
        assert_eq!((listed.workspace_id.as_str(), listed.workspace_name.as_str()), ("ws-1", "Sales"));
        assert!(listed.has_backup);
    }

    #[tokio::test]
    async fn empty_revert_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::default()));
        assert!(matches!(svc.revert(&[]).await, Err(StorageError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn upload_is_gated_by_validation_and_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::with_models(&["m1"]));
        let svc = service(dir.path(), stub.clone());
        svc.download_many("ws-1", &ids(&["m1"]), false).await;

        let ok = svc.upload("ws-1", "m1", "ws-1/semantic-models/m1").await;
        assert_eq!(ok.status, UploadStatus::Success, "{:?}", ok.error);
        assert_eq!(ok.parts_uploaded, 4);
        let submitted = stub.submitted();
        assert!(submitted[0].2.parts.iter().all(|p| p.path != METADATA_FILE_NAME));

        let folder = svc.data_folder().join("ws-1/semantic-models/m1");
        fs::remove_file(folder.join("definition/model.tmdl")).await.unwrap();
        let gated = svc.upload("ws-1", "m1", "ws-1/semantic-models/m1").await;
        assert_eq!(gated.status, UploadStatus::ValidationFailed);
        assert_eq!(gated.validation_errors, Some(vec!["definition/model.tmdl".to_string()]));
        assert_eq!(stub.submitted().len(), 1);

        let missing = svc.upload("ws-1", "m1", "nowhere").await;
        assert_eq!(missing.validation_errors, Some(vec![FOLDER_NOT_FOUND.to_string()]));
    }

    #[tokio::test]
    async fn deploy_uploads_downloaded_models_only() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::with_models(&["m1"]));
        let svc = service(dir.path(), stub.clone());
        svc.download_many("ws-1", &ids(&["m1"]), false).await;

        let report = svc.deploy("ws-1", &ids(&["m1", "m2"])).await;

        assert_eq!((report.successful, report.failed), (1, 1));
        assert_eq!(report.models[0].status, "success");
        assert_eq!(report.models[1].error.as_deref(), Some(MISSING_DEFINITION));
        assert_eq!(stub.submitted().len(), 1);
    }

    #[tokio::test]
    async fn replace_in_folder_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::with_models(&["m1"])));
        svc.download_many("ws-1", &ids(&["m1"]), false).await;

        let report = svc
            .replace_in_folder("ws-1/semantic-models/m1", &mappings())
            .await
            .unwrap();
        assert_eq!(report.status, ReplacementStatus::Updated);

        let err = svc.replace_in_folder("ws-1/absent", &mappings()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn absolute_folders_outside_the_roots_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::default()));

        let err = svc
            .replace_in_folder(outside.path().to_str().unwrap(), &mappings())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn inventory_groups_by_workspace_and_skips_backup_slot() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::with_models(&["m1", "m2"])));
        svc.download_many("ws-1", &ids(&["m1"]), true).await;
        svc.download_many("ws-1", &ids(&["m2"]), false).await;

        let inventory = svc.list_downloaded_artifacts().await.unwrap();

        assert_eq!(inventory.total, 2);
        assert_eq!(inventory.workspaces.len(), 1);
        let models = &inventory.workspaces[0].semantic_models;
        assert_eq!(models[0].artifact_id, "m1");
        assert!(models[0].has_backup);
        assert!(!models[1].has_backup);
        assert_eq!(models[0].definition_format.as_deref(), Some("TMDL"));
    }

    #[tokio::test]
    async fn lists_complete_models_under_download_folder() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::default()));
        let ws = svc.config().download_folder.join("ws-1");
        fs::create_dir_all(ws.join("Complete/definition")).await.unwrap();
        fs::write(ws.join("Complete/definition.pbism"), "{}").await.unwrap();
        fs::create_dir_all(ws.join("Partial/definition")).await.unwrap();

        let models = svc.list_downloaded_models("ws-1").await.unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_name, "Complete");
        assert_eq!(models[0].relative_path, "ws-1/Complete");
        assert!(svc.list_downloaded_models("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_folder_validates_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(StubTransport::default()));

        assert!(matches!(
            svc.open_artifact_folder("ws-1", "../../etc").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            svc.open_workspace_folder("ws-1").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
