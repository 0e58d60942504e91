//! `metadata.json` sidecar persistence.
//!
//! Reads are best-effort: a missing or malformed sidecar is simply "no
//! metadata" and never fails the caller.

use crate::{
    models::artifact::{ArtifactMetadata, METADATA_FILE_NAME},
    services::error::StorageResult,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub fn metadata_path(folder: &Path) -> PathBuf {
    folder.join(METADATA_FILE_NAME)
}

/// Write `metadata` into `folder/metadata.json`, replacing any previous
/// content. `last_updated` is stamped with the current time when unset.
pub async fn write(folder: &Path, metadata: &mut ArtifactMetadata) -> StorageResult<PathBuf> {
    fs::create_dir_all(folder).await?;
    if metadata.last_updated.is_none() {
        metadata.last_updated = Some(Utc::now());
    }

    let path = metadata_path(folder);
    let body = serde_json::to_vec_pretty(metadata)?;
    fs::write(&path, body).await?;
    debug!("wrote metadata {}", path.display());
    Ok(path)
}

pub async fn read(folder: &Path) -> Option<ArtifactMetadata> {
    let path = metadata_path(folder);
    let raw = fs::read(&path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            debug!("ignoring unreadable metadata {}: {}", path.display(), err);
            None
        }
    }
}
