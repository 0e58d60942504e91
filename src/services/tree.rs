//! Small async helpers for walking and copying directory trees.
//!
//! Symlinked files are followed; symlinked directories are not descended
//! into, which keeps both walks free of cycles.

use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};

/// Every regular file below `root`, in no particular order.
///
/// Failing to read `root` itself is an error; unreadable subdirectories are
/// logged and skipped.
pub async fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if dir == root => return Err(err),
            Err(err) => {
                warn!("skipping unreadable directory {}: {}", dir.display(), err);
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            } else if file_type.is_symlink() {
                match fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => files.push(path),
                    Ok(_) => debug!("not following directory link {}", path.display()),
                    Err(err) => debug!("dangling link {}: {}", path.display(), err),
                }
            }
        }
    }

    Ok(files)
}

/// Recursively copy `src` into `dst`, creating `dst` and any missing parents.
pub async fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from_dir, to_dir)) = pending.pop() {
        fs::create_dir_all(&to_dir).await?;
        let mut entries = fs::read_dir(&from_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = to_dir.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                pending.push((from, to));
            } else if file_type.is_file() || fs::metadata(&from).await.is_ok_and(|m| m.is_file()) {
                fs::copy(&from, &to).await?;
                copied += 1;
            } else {
                debug!("not copying {}", from.display());
            }
        }
    }

    Ok(copied)
}

/// True iff `path` is a directory with at least one entry.
pub async fn is_non_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Immediate subdirectories of `path`, sorted by name. A missing `path`
/// has none.
pub async fn child_dirs(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).await.unwrap();
        fs::write(src.join("top.txt"), "1").await.unwrap();
        fs::write(src.join("a/b/deep.txt"), "2").await.unwrap();

        let dst = dir.path().join("out/copy");
        let copied = copy_tree(&src, &dst).await.unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("a/b/deep.txt")).await.unwrap(), "2");

        let mut listed = list_files(&dst).await.unwrap();
        listed.sort();
        assert_eq!(listed, vec![dst.join("a/b/deep.txt"), dst.join("top.txt")]);
    }

    #[tokio::test]
    async fn empty_and_missing_dirs_are_not_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_non_empty_dir(dir.path()).await);
        assert!(!is_non_empty_dir(&dir.path().join("missing")).await);
        fs::write(dir.path().join("f"), "x").await.unwrap();
        assert!(is_non_empty_dir(dir.path()).await);
    }

    #[tokio::test]
    async fn listing_a_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(&dir.path().join("nope")).await.is_err());
        assert!(remove_tree(&dir.path().join("nope")).await.is_ok());
    }
}
