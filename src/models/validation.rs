//! Result of checking a folder before it is uploaded.

use serde::{Deserialize, Serialize};

/// Marker reported instead of individual files when the folder itself is absent.
pub const FOLDER_NOT_FOUND: &str = "folder_not_found";

/// Folder validation response contract.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub missing_files: Vec<String>,
    pub folder_path: String,
}
