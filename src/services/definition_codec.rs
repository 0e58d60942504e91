//! Conversion between wire definitions and local folder trees.

use crate::{
    models::{
        artifact::DefinitionFormat,
        definition::{Definition, DefinitionPart, PayloadType},
    },
    services::{
        error::{StorageError, StorageResult},
        tree,
    },
};
use base64::{Engine as _, engine::general_purpose};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Write every decodable part below `output_folder` and return the absolute
/// paths that were written.
///
/// Parts with an empty path or payload, undecodable base64, non UTF-8
/// content, or a path that would leave `output_folder` are skipped; the
/// remaining parts are still written.
pub async fn materialize(definition: &Definition, output_folder: &Path) -> StorageResult<Vec<PathBuf>> {
    let root = std::path::absolute(output_folder)?;
    fs::create_dir_all(&root).await?;

    let mut written = Vec::with_capacity(definition.parts.len());
    for part in &definition.parts {
        if part.path.is_empty() || part.payload.is_empty() {
            debug!("skipping empty part `{}`", part.path);
            continue;
        }
        let Some(relative) = safe_relative_path(&part.path) else {
            warn!("skipping part with unsafe path `{}`", part.path);
            continue;
        };
        let Some(text) = decode_payload(part) else {
            warn!("skipping part `{}`: payload is not valid UTF-8 text", part.path);
            continue;
        };

        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::write(&target, text.as_bytes()).await {
            Ok(()) => written.push(target),
            Err(err) => warn!("failed to write {}: {}", target.display(), err),
        }
    }

    debug!("materialized {} of {} parts into {}", written.len(), definition.parts.len(), root.display());
    Ok(written)
}

/// Read every UTF-8 file below `folder` into a base64 definition.
///
/// Files that are not valid UTF-8 are left out of the result.
pub async fn dematerialize(folder: &Path, format: DefinitionFormat) -> StorageResult<Definition> {
    if !fs::try_exists(folder).await.unwrap_or(false) {
        return Err(StorageError::NotFound(format!("Folder not found: {}", folder.display())));
    }

    let mut parts = Vec::new();
    for file in tree::list_files(folder).await? {
        let Ok(relative) = file.strip_prefix(folder) else {
            continue;
        };
        let content = match fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(err) => {
                debug!("leaving {} out of definition: {}", file.display(), err);
                continue;
            }
        };
        parts.push(DefinitionPart {
            path: posix_path(relative),
            payload: general_purpose::STANDARD.encode(content.as_bytes()),
            payload_type: PayloadType::Base64,
        });
    }
    parts.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(Definition {
        format: Some(format),
        parts,
    })
}

fn decode_payload(part: &DefinitionPart) -> Option<String> {
    match part.payload_type {
        PayloadType::Base64 => {
            let bytes = general_purpose::STANDARD.decode(part.payload.trim()).ok()?;
            String::from_utf8(bytes).ok()
        }
        PayloadType::Plain => Some(part.payload.clone()),
    }
}

/// Folder-relative path for a wire path, or `None` if it is absolute or
/// climbs out of the folder.
fn safe_relative_path(wire_path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(wire_path).components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn posix_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
