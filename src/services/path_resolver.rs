//! Canonical on-disk locations for artifacts and their backup slot.
//!
//! Layout:
//! - live artifact: `{base}/{workspace}/{artifact_type}/{artifact_id}/`
//! - backup slot:   `{base}/{workspace}/{artifact_type}/{backup}/{artifact_id}/`
//!
//! `{workspace}` is the workspace id, or the sanitized workspace name when
//! the resolver is configured to use names.

use crate::{
    config::AppConfig,
    services::error::{StorageError, StorageResult},
};
use std::{
    env,
    ffi::OsString,
    path::{Component, Path, PathBuf},
};
use tokio::fs;

const MAX_SEGMENT_LEN: usize = 255;
const RESERVED_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are invalid in folder names with `_`.
pub fn sanitize_folder_name(name: &str) -> String {
    name.chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

fn workspace_segment(workspace_id: &str, workspace_name: Option<&str>, use_workspace_id: bool) -> String {
    match workspace_name {
        Some(name) if !use_workspace_id && !name.is_empty() => sanitize_folder_name(name),
        _ => workspace_id.to_string(),
    }
}

/// `{base}/{workspace}/{artifact_type}/{artifact_id}`
pub fn artifact_path(
    base: &Path,
    workspace_id: &str,
    artifact_type: &str,
    artifact_id: &str,
    workspace_name: Option<&str>,
    use_workspace_id: bool,
) -> PathBuf {
    base.join(workspace_segment(workspace_id, workspace_name, use_workspace_id))
        .join(artifact_type)
        .join(artifact_id)
}

/// `{base}/{workspace}/{artifact_type}/{backup_segment}/{artifact_id}`
pub fn backup_path(
    base: &Path,
    workspace_id: &str,
    artifact_type: &str,
    artifact_id: &str,
    backup_segment: &str,
    workspace_name: Option<&str>,
    use_workspace_id: bool,
) -> PathBuf {
    base.join(workspace_segment(workspace_id, workspace_name, use_workspace_id))
        .join(artifact_type)
        .join(backup_segment)
        .join(artifact_id)
}

/// Reject identifiers that could change the shape of a derived path.
pub fn ensure_segment_safe(segment: &str) -> StorageResult<()> {
    let invalid = |reason: &str| Err(StorageError::InvalidPath(format!("`{segment}` {reason}")));

    if segment.is_empty() {
        return invalid("is empty");
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return invalid("is too long");
    }
    if segment.contains('/') || segment.contains('\\') {
        return invalid("contains a path separator");
    }
    if segment == "." || segment == ".." {
        return invalid("contains a relative path component");
    }
    if segment.chars().any(|c| c.is_control()) {
        return invalid("contains control characters");
    }
    Ok(())
}

/// Resolve a user-supplied folder: an existing absolute path as-is, else
/// relative to `primary`, else relative to `secondary`.
pub async fn resolve_folder(input: &str, primary: &Path, secondary: &Path) -> StorageResult<PathBuf> {
    let candidate = Path::new(input);
    if candidate.is_absolute() && exists(candidate).await {
        return Ok(candidate.to_path_buf());
    }

    let from_primary = primary.join(input);
    if exists(&from_primary).await {
        return Ok(from_primary);
    }

    let from_secondary = secondary.join(input);
    if exists(&from_secondary).await {
        return Ok(from_secondary);
    }

    Err(StorageError::NotFound(format!(
        "Model folder not found: {}. Tried: {}, {}",
        input,
        from_primary.display(),
        from_secondary.display()
    )))
}

/// Resolve `candidate` to an absolute path and require it to lie under `base`.
///
/// `..` components are folded and symlinks are resolved for the part of the
/// path that exists, so neither can be used to step outside `base`.
pub async fn ensure_within(candidate: &Path, base: &Path) -> StorageResult<PathBuf> {
    let base_abs = resolve_absolute(base).await?;
    let candidate_abs = resolve_absolute(candidate).await?;
    if candidate_abs.starts_with(&base_abs) {
        Ok(candidate_abs)
    } else {
        Err(StorageError::InvalidPath(format!(
            "{} is outside the configured data directory",
            candidate.display()
        )))
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn resolve_absolute(path: &Path) -> StorageResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    let lexical = normalize_lexically(&absolute);

    // Canonicalize the longest existing ancestor and re-attach the rest.
    let mut existing = lexical.as_path();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(real) = fs::canonicalize(existing).await {
            let mut out = real;
            for name in tail.iter().rev() {
                out.push(name);
            }
            return Ok(out);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(lexical),
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path policy bound to one data folder and naming configuration.
#[derive(Clone, Debug)]
pub struct PathResolver {
    base: PathBuf,
    backup_folder_name: String,
    use_workspace_id: bool,
}

impl PathResolver {
    pub fn new(base: impl Into<PathBuf>, backup_folder_name: impl Into<String>, use_workspace_id: bool) -> Self {
        Self {
            base: base.into(),
            backup_folder_name: backup_folder_name.into(),
            use_workspace_id,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.data_folder.clone(),
            cfg.backup_folder_name.clone(),
            cfg.use_workspace_id_in_path,
        )
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn backup_folder_name(&self) -> &str {
        &self.backup_folder_name
    }

    pub fn artifact_path(
        &self,
        workspace_id: &str,
        artifact_type: &str,
        artifact_id: &str,
        workspace_name: Option<&str>,
    ) -> PathBuf {
        artifact_path(
            &self.base,
            workspace_id,
            artifact_type,
            artifact_id,
            workspace_name,
            self.use_workspace_id,
        )
    }

    pub fn backup_path(
        &self,
        workspace_id: &str,
        artifact_type: &str,
        artifact_id: &str,
        workspace_name: Option<&str>,
    ) -> PathBuf {
        backup_path(
            &self.base,
            workspace_id,
            artifact_type,
            artifact_id,
            &self.backup_folder_name,
            workspace_name,
            self.use_workspace_id,
        )
    }

    pub async fn ensure_within_base(&self, candidate: &Path) -> StorageResult<PathBuf> {
        ensure_within(candidate, &self.base).await
    }

    /// Existing artifact folder for externally supplied ids, guaranteed to
    /// be inside the data folder.
    pub async fn validate_artifact_folder(
        &self,
        workspace_id: &str,
        artifact_type: &str,
        artifact_id: &str,
        workspace_name: Option<&str>,
    ) -> StorageResult<PathBuf> {
        ensure_segment_safe(workspace_id)?;
        ensure_segment_safe(artifact_id)?;
        let path = self.artifact_path(workspace_id, artifact_type, artifact_id, workspace_name);
        let resolved = self.ensure_within_base(&path).await?;
        Self::require_dir(resolved, "Artifact").await
    }

    /// Existing `{base}/{workspace}/{artifact_type}` folder for an external id.
    pub async fn validate_workspace_folder(
        &self,
        workspace_id: &str,
        artifact_type: &str,
        workspace_name: Option<&str>,
    ) -> StorageResult<PathBuf> {
        ensure_segment_safe(workspace_id)?;
        let path = self
            .base
            .join(workspace_segment(workspace_id, workspace_name, self.use_workspace_id))
            .join(artifact_type);
        let resolved = self.ensure_within_base(&path).await?;
        Self::require_dir(resolved, "Workspace").await
    }

    async fn require_dir(path: PathBuf, what: &str) -> StorageResult<PathBuf> {
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(StorageError::InvalidPath(format!(
                "{} is not a directory",
                path.display()
            ))),
            Err(_) => Err(StorageError::NotFound(format!(
                "{} folder not found: {}",
                what,
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_path_only_adds_backup_segment() {
        let base = Path::new("/data");
        let live = artifact_path(base, "ws-1", "semantic-models", "m-9", None, true);
        let backup = backup_path(base, "ws-1", "semantic-models", "m-9", "backup", None, true);

        assert_eq!(live, PathBuf::from("/data/ws-1/semantic-models/m-9"));
        assert_eq!(backup, PathBuf::from("/data/ws-1/semantic-models/backup/m-9"));
        assert_eq!(live.parent().unwrap().join("backup").join("m-9"), backup);
    }

    #[test]
    fn workspace_name_is_sanitized_when_used() {
        let base = Path::new("/data");
        let path = artifact_path(base, "ws-1", "semantic-models", "m", Some("Sales: EU/West?"), false);
        assert_eq!(path, PathBuf::from("/data/Sales_ EU_West_/semantic-models/m"));
    }

    #[test]
    fn empty_workspace_name_falls_back_to_id() {
        let base = Path::new("/data");
        let path = artifact_path(base, "ws<1>", "t", "m", Some(""), false);
        assert_eq!(path, PathBuf::from("/data/ws<1>/t/m"));
        let path = artifact_path(base, "ws-1", "t", "m", None, false);
        assert_eq!(path, PathBuf::from("/data/ws-1/t/m"));
    }

    #[test]
    fn sanitizes_every_reserved_character() {
        assert_eq!(sanitize_folder_name(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn segments_with_traversal_are_rejected() {
        assert!(ensure_segment_safe("model-1").is_ok());
        assert!(ensure_segment_safe("v1..2").is_ok());
        assert!(ensure_segment_safe("..hidden").is_ok());
        for bad in ["", "..", "../../etc", "a/b", r"a\b", "x\0y"] {
            assert!(
                matches!(ensure_segment_safe(bad), Err(StorageError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn traversal_artifact_id_is_invalid_path() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path().join("data"), "backup", true);
        fs::create_dir_all(resolver.base()).await.unwrap();

        let err = resolver
            .validate_artifact_folder("ws", "semantic-models", "../../etc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn containment_rejects_escapes_and_accepts_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("data");
        fs::create_dir_all(base.join("ws/semantic-models/m1")).await.unwrap();

        let inside = ensure_within(&base.join("ws/semantic-models/m1"), &base).await.unwrap();
        assert!(inside.ends_with("ws/semantic-models/m1"));

        let escaped = ensure_within(&base.join("ws/../../outside"), &base).await;
        assert!(matches!(escaped, Err(StorageError::InvalidPath(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn containment_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("data");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&base).await.unwrap();
        fs::create_dir_all(&outside).await.unwrap();
        std::os::unix::fs::symlink(&outside, base.join("link")).unwrap();

        let result = ensure_within(&base.join("link/secret"), &base).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn validate_artifact_folder_reports_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path(), "backup", true);
        let err = resolver
            .validate_artifact_folder("ws", "semantic-models", "absent", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_folder_prefers_primary_then_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("downloads");
        let secondary = dir.path().join("data");
        fs::create_dir_all(primary.join("ws/a")).await.unwrap();
        fs::create_dir_all(secondary.join("ws/a")).await.unwrap();
        fs::create_dir_all(secondary.join("ws/b")).await.unwrap();

        assert_eq!(resolve_folder("ws/a", &primary, &secondary).await.unwrap(), primary.join("ws/a"));
        assert_eq!(resolve_folder("ws/b", &primary, &secondary).await.unwrap(), secondary.join("ws/b"));

        let abs = secondary.join("ws/b");
        assert_eq!(resolve_folder(abs.to_str().unwrap(), &primary, &secondary).await.unwrap(), abs);

        let err = resolve_folder("ws/c", &primary, &secondary).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(msg.contains(&primary.join("ws/c").display().to_string()));
        assert!(msg.contains(&secondary.join("ws/c").display().to_string()));
    }
}
