//! Bulk server-name substitution across the `.tmdl` files of a model.
//!
//! Every mapping is a case-insensitive *literal* match: regex metacharacters
//! in a server name are escaped, and the new name is inserted verbatim. The
//! run is a fold over per-file outcomes; a file that cannot be read or
//! written is skipped and the rest of the batch continues.

use crate::{
    models::replacement::{FileOutcome, ReplacementReport, ReplacementStatus, ServerMappings},
    services::{
        error::{SideEffectError, SideEffectResult, StorageError, StorageResult},
        metadata_store, tree,
    },
};
use chrono::Utc;
use regex::{NoExpand, Regex, RegexBuilder};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};

/// Extension of the definition-language files that are searched.
pub const DEFINITION_EXTENSION: &str = "tmdl";

/// Recorded as `last_operation` in the metadata after a successful run.
pub const SERVER_NAME_UPDATE: &str = "server_name_update";

/// A mapping with its case-insensitive matcher compiled once per run.
pub struct CompiledMapping {
    pub old_server: String,
    pub new_server: String,
    matcher: Regex,
}

impl CompiledMapping {
    pub fn compile(mappings: &ServerMappings) -> StorageResult<Vec<CompiledMapping>> {
        mappings
            .iter()
            .filter(|m| {
                if m.old_server.is_empty() {
                    warn!("ignoring mapping with an empty server name");
                }
                !m.old_server.is_empty()
            })
            .map(|m| {
                let matcher = RegexBuilder::new(&regex::escape(&m.old_server))
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| StorageError::InvalidInput(format!("invalid server name: {err}")))?;
                Ok(CompiledMapping {
                    old_server: m.old_server.clone(),
                    new_server: m.new_server.clone(),
                    matcher,
                })
            })
            .collect()
    }
}

/// Apply every mapping in order to `content`.
///
/// Returns the rewritten text and the number of occurrences replaced per
/// `old_server`; keys with no occurrence are absent.
pub fn apply_mappings(content: &str, mappings: &[CompiledMapping]) -> (String, BTreeMap<String, usize>) {
    let mut current = content.to_string();
    let mut counts = BTreeMap::new();
    for mapping in mappings {
        let found = mapping.matcher.find_iter(&current).count();
        if found == 0 {
            continue;
        }
        current = mapping
            .matcher
            .replace_all(&current, NoExpand(&mapping.new_server))
            .into_owned();
        *counts.entry(mapping.old_server.clone()).or_insert(0) += found;
    }
    (current, counts)
}

/// Run the replacement over `folder`.
///
/// When something changed and `record_metadata` is set, the folder's
/// metadata (if any) is refreshed with the operation and the mapping.
pub async fn replace(folder: &Path, mappings: &ServerMappings, record_metadata: bool) -> ReplacementReport {
    let report = match replace_with_outcomes(folder, mappings).await {
        Ok((report, _)) => report,
        Err(err) => {
            warn!("replacement in {} failed: {}", folder.display(), err);
            return ReplacementReport::failed(err.to_string());
        }
    };

    if report.status == ReplacementStatus::Updated && record_metadata {
        if let Err(err) = record_operation(folder, mappings).await {
            warn!("{}", err);
        }
    }
    report
}

/// Same as [`replace`] without the metadata step, also returning what
/// happened to each candidate file.
pub async fn replace_with_outcomes(
    folder: &Path,
    mappings: &ServerMappings,
) -> StorageResult<(ReplacementReport, Vec<FileOutcome>)> {
    let compiled = CompiledMapping::compile(mappings)?;
    let candidates = candidate_files(folder).await?;
    if candidates.is_empty() {
        return Ok((ReplacementReport::no_changes("No .tmdl files found"), Vec::new()));
    }

    let mut outcomes = Vec::with_capacity(candidates.len());
    for path in candidates {
        outcomes.push(process_file(path, &compiled).await);
    }

    let report = ReplacementReport::from_outcomes(&outcomes);
    info!(
        "replacement in {}: {} of {} files updated",
        folder.display(),
        report.files_updated,
        outcomes.len()
    );
    Ok((report, outcomes))
}

/// `.tmdl` files under `definition/`, `definition/tables/` and the folder
/// itself, each listed once.
pub async fn candidate_files(folder: &Path) -> StorageResult<BTreeSet<PathBuf>> {
    let roots = [
        folder.join("definition"),
        folder.join("definition").join("tables"),
        folder.to_path_buf(),
    ];

    let mut found = BTreeSet::new();
    for root in roots {
        if !fs::try_exists(&root).await.unwrap_or(false) {
            continue;
        }
        for file in tree::list_files(&root).await? {
            if has_definition_extension(&file) {
                found.insert(file);
            }
        }
    }
    Ok(found)
}

fn has_definition_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == DEFINITION_EXTENSION)
}

async fn process_file(path: PathBuf, mappings: &[CompiledMapping]) -> FileOutcome {
    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) => {
            warn!("skipping {}: {}", path.display(), err);
            return FileOutcome::Skipped {
                path,
                reason: err.to_string(),
            };
        }
    };

    let (updated, counts) = apply_mappings(&content, mappings);
    if counts.is_empty() {
        return FileOutcome::Unchanged { path };
    }

    if let Err(err) = fs::write(&path, updated.as_bytes()).await {
        warn!("could not rewrite {}: {}", path.display(), err);
        return FileOutcome::Skipped {
            path,
            reason: err.to_string(),
        };
    }

    debug!("rewrote {} ({:?})", path.display(), counts);
    FileOutcome::Rewritten { path, counts }
}

async fn record_operation(folder: &Path, mappings: &ServerMappings) -> SideEffectResult<()> {
    let Some(mut metadata) = metadata_store::read(folder).await else {
        return Ok(());
    };
    metadata.last_updated = Some(Utc::now());
    metadata.last_operation = Some(SERVER_NAME_UPDATE.to_string());
    metadata.server_mappings = Some(mappings.clone());
    metadata_store::write(folder, &mut metadata)
        .await
        .map(|_| ())
        .map_err(|err| SideEffectError::new("metadata update", err))
}
