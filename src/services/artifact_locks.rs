//! In-process, per-artifact-folder mutual exclusion.
//!
//! Serialises download, replace, restore and upload on the same folder
//! within this process. Other processes touching the tree are not covered.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct ArtifactLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl ArtifactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `folder`; released when the guard drops.
    pub async fn lock(&self, folder: &Path) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds any more.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(folder.to_path_buf()).or_default().clone()
        };
        slot.lock_owned().await
    }
}
