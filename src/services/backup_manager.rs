//! Single-slot backups of artifact folders.
//!
//! Each artifact owns exactly one backup slot. Creating a backup wipes the
//! slot and copies the artifact in; restoring wipes the artifact and copies
//! the slot back. Neither step is atomic.

use crate::{
    models::artifact::{BACKUP_INFO_FILE_NAME, BackupInfo},
    services::{
        error::{SideEffectError, StorageError, StorageResult},
        metadata_store, tree,
    },
};
use chrono::Utc;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};

/// A backup exists when its folder is present and non-empty.
pub async fn exists(backup: &Path) -> bool {
    tree::is_non_empty_dir(backup).await
}

/// Snapshot `source` into `backup`, replacing whatever the slot held.
pub async fn create(source: &Path, backup: &Path) -> StorageResult<PathBuf> {
    if !fs::try_exists(source).await.unwrap_or(false) {
        return Err(StorageError::NotFound(format!(
            "Source folder not found: {}",
            source.display()
        )));
    }

    tree::remove_tree(backup).await?;
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent).await?;
    }
    let copied = tree::copy_tree(source, backup).await?;

    let backup_info = BackupInfo {
        backup_timestamp: Utc::now(),
        source_folder: source.display().to_string(),
    };
    fs::write(
        backup.join(BACKUP_INFO_FILE_NAME),
        serde_json::to_vec_pretty(&backup_info)?,
    )
    .await?;

    info!("backed up {} ({} files) to {}", source.display(), copied, backup.display());
    Ok(backup.to_path_buf())
}

/// Replace `target` with the contents of `backup`.
///
/// Fails with `NotFound` without touching `target` when there is no backup.
/// Anything that goes wrong after `target` has been removed is reported as
/// `RestoreFailed`; the target may then be partially restored. Refreshing
/// the restored metadata is best-effort and only logged when it fails.
pub async fn restore(backup: &Path, target: &Path) -> StorageResult<()> {
    if !exists(backup).await {
        return Err(StorageError::NotFound(format!(
            "No backup found: {}",
            backup.display()
        )));
    }

    replace_with_backup(backup, target)
        .await
        .map_err(|err| StorageError::RestoreFailed {
            target: target.display().to_string(),
            reason: err.to_string(),
        })?;

    if let Some(mut metadata) = metadata_store::read(target).await {
        metadata.last_restored = Some(Utc::now());
        metadata.restored_from_backup = Some(true);
        if let Err(err) = metadata_store::write(target, &mut metadata).await {
            warn!("{}", SideEffectError::new("metadata refresh", err));
        }
    } else {
        debug!("restored {} has no metadata to update", target.display());
    }

    info!("restored {} from {}", target.display(), backup.display());
    Ok(())
}

async fn replace_with_backup(backup: &Path, target: &Path) -> io::Result<()> {
    tree::remove_tree(target).await?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    tree::copy_tree(backup, target).await?;

    match fs::remove_file(target.join(BACKUP_INFO_FILE_NAME)).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::{ArtifactMetadata, DefinitionFormat};

    async fn artifact(dir: &Path, body: &str) -> PathBuf {
        let folder = dir.join("ws/semantic-models/m1");
        fs::create_dir_all(folder.join("definition")).await.unwrap();
        fs::write(folder.join("definition/model.tmdl"), body).await.unwrap();
        folder
    }

    #[tokio::test]
    async fn create_writes_copy_and_backup_info() {
        let dir = tempfile::tempdir().unwrap();
        let source = artifact(dir.path(), "v1").await;
        let backup = dir.path().join("ws/semantic-models/backup/m1");

        create(&source, &backup).await.unwrap();

        assert!(exists(&backup).await);
        assert_eq!(fs::read_to_string(backup.join("definition/model.tmdl")).await.unwrap(), "v1");
        let info: BackupInfo =
            serde_json::from_slice(&fs::read(backup.join(BACKUP_INFO_FILE_NAME)).await.unwrap()).unwrap();
        assert_eq!(info.source_folder, source.display().to_string());
    }

    #[tokio::test]
    async fn second_backup_replaces_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let source = artifact(dir.path(), "v1").await;
        fs::write(source.join("only-in-v1.tmdl"), "x").await.unwrap();
        let backup = dir.path().join("backup/m1");
        create(&source, &backup).await.unwrap();

        fs::write(source.join("definition/model.tmdl"), "v2").await.unwrap();
        fs::remove_file(source.join("only-in-v1.tmdl")).await.unwrap();
        create(&source, &backup).await.unwrap();

        assert_eq!(fs::read_to_string(backup.join("definition/model.tmdl")).await.unwrap(), "v2");
        assert!(!backup.join("only-in-v1.tmdl").exists());
    }

    #[tokio::test]
    async fn create_requires_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = create(&dir.path().join("missing"), &dir.path().join("b")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn restore_without_backup_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = artifact(dir.path(), "current").await;

        let err = restore(&dir.path().join("backup/m1"), &target).await.unwrap_err();

        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(fs::read_to_string(target.join("definition/model.tmdl")).await.unwrap(), "current");
    }

    #[tokio::test]
    async fn restore_replaces_target_and_marks_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let target = artifact(dir.path(), "original").await;
        let mut meta = ArtifactMetadata::for_download("ws", "ws", "m1", "M", DefinitionFormat::Tmdl, 1);
        metadata_store::write(&target, &mut meta).await.unwrap();
        let backup = dir.path().join("backup/m1");
        create(&target, &backup).await.unwrap();

        fs::write(target.join("definition/model.tmdl"), "edited").await.unwrap();
        fs::write(target.join("stray.tmdl"), "new file").await.unwrap();

        restore(&backup, &target).await.unwrap();

        assert_eq!(fs::read_to_string(target.join("definition/model.tmdl")).await.unwrap(), "original");
        assert!(!target.join("stray.tmdl").exists());
        assert!(!target.join(BACKUP_INFO_FILE_NAME).exists());
        assert!(backup.join(BACKUP_INFO_FILE_NAME).exists());

        let restored = metadata_store::read(&target).await.unwrap();
        assert_eq!(restored.restored_from_backup, Some(true));
        assert!(restored.last_restored.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restore_succeeds_when_metadata_cannot_be_refreshed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = artifact(dir.path(), "original").await;
        let mut meta = ArtifactMetadata::for_download("ws", "ws", "m1", "M", DefinitionFormat::Tmdl, 1);
        let meta_path = metadata_store::write(&target, &mut meta).await.unwrap();
        std::fs::set_permissions(&meta_path, std::fs::Permissions::from_mode(0o444)).unwrap();
        let backup = dir.path().join("backup/m1");
        create(&target, &backup).await.unwrap();

        // Permission bits do not bind a privileged user.
        if std::fs::OpenOptions::new().write(true).open(&meta_path).is_ok() {
            return;
        }

        fs::write(target.join("definition/model.tmdl"), "edited").await.unwrap();
        restore(&backup, &target).await.unwrap();

        assert_eq!(fs::read_to_string(target.join("definition/model.tmdl")).await.unwrap(), "original");
        assert_eq!(metadata_store::read(&target).await.unwrap().restored_from_backup, None);
    }

    #[tokio::test]
    async fn restore_without_metadata_leaves_it_absent() {
        let dir = tempfile::tempdir().unwrap();
        let target = artifact(dir.path(), "original").await;
        let backup = dir.path().join("backup/m1");
        create(&target, &backup).await.unwrap();

        restore(&backup, &target).await.unwrap();
        assert!(metadata_store::read(&target).await.is_none());
    }
}
