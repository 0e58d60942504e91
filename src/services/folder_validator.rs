//! Minimal manifest check run before a folder is uploaded.

use crate::models::validation::{FOLDER_NOT_FOUND, ValidationReport};
use std::path::Path;
use tokio::fs;

#[derive(Clone, Copy)]
enum Kind {
    File,
    Dir,
}

/// Required entries, reported by these literal names when missing.
const REQUIRED: [(&str, &str, Kind); 4] = [
    ("definition.pbism", "definition.pbism", Kind::File),
    ("definition/", "definition", Kind::Dir),
    ("definition/database.tmdl", "definition/database.tmdl", Kind::File),
    ("definition/model.tmdl", "definition/model.tmdl", Kind::File),
];

pub async fn validate(folder: &Path) -> ValidationReport {
    let folder_path = folder.display().to_string();

    if !fs::metadata(folder).await.is_ok_and(|m| m.is_dir()) {
        return ValidationReport {
            valid: false,
            missing_files: vec![FOLDER_NOT_FOUND.to_string()],
            folder_path,
        };
    }

    let mut missing_files = Vec::new();
    for (name, relative, kind) in REQUIRED {
        let present = match fs::metadata(folder.join(relative)).await {
            Ok(meta) => match kind {
                Kind::File => meta.is_file(),
                Kind::Dir => meta.is_dir(),
            },
            Err(_) => false,
        };
        if !present {
            missing_files.push(name.to_string());
        }
    }

    ValidationReport {
        valid: missing_files.is_empty(),
        missing_files,
        folder_path,
    }
}
