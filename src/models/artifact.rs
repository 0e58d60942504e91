//! Artifact provenance records kept next to downloaded definitions.

use crate::models::replacement::ServerMappings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// Sidecar file written into every artifact folder.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Bookkeeping file written into a backup slot (never part of the artifact).
pub const BACKUP_INFO_FILE_NAME: &str = "backup_info.json";

/// Value of `artifact_type` recorded for semantic models.
pub const SEMANTIC_MODEL_ARTIFACT_TYPE: &str = "semantic-model";

/// Serialization format of a model definition.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DefinitionFormat {
    #[default]
    #[serde(rename = "TMDL", alias = "tmdl")]
    Tmdl,
    #[serde(rename = "TMSL", alias = "tmsl")]
    Tmsl,
}

impl DefinitionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionFormat::Tmdl => "TMDL",
            DefinitionFormat::Tmsl => "TMSL",
        }
    }
}

impl fmt::Display for DefinitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefinitionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("TMDL") {
            Ok(DefinitionFormat::Tmdl)
        } else if s.eq_ignore_ascii_case("TMSL") {
            Ok(DefinitionFormat::Tmsl)
        } else {
            Err(format!("definition format must be TMDL or TMSL (got `{s}`)"))
        }
    }
}

/// Provenance of a downloaded artifact, persisted as `metadata.json`.
///
/// Keys this service does not know about are carried in `extra` so that a
/// rewrite never drops information another tool put there.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ArtifactMetadata {
    pub workspace_id: String,
    pub workspace_name: String,
    pub artifact_id: String,
    pub artifact_name: String,
    pub artifact_type: String,

    #[serde(with = "timestamp")]
    pub download_timestamp: DateTime<Utc>,

    /// Filled in by the metadata store when absent.
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub definition_format: DefinitionFormat,

    #[serde(default)]
    pub files_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_mappings: Option<ServerMappings>,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_restored: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from_backup: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArtifactMetadata {
    /// Fresh record for a definition that was just downloaded.
    pub fn for_download(
        workspace_id: &str,
        workspace_name: &str,
        artifact_id: &str,
        artifact_name: &str,
        definition_format: DefinitionFormat,
        files_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            workspace_id: workspace_id.to_string(),
            workspace_name: workspace_name.to_string(),
            artifact_id: artifact_id.to_string(),
            artifact_name: artifact_name.to_string(),
            artifact_type: SEMANTIC_MODEL_ARTIFACT_TYPE.to_string(),
            download_timestamp: now,
            last_updated: Some(now),
            definition_format,
            files_count,
            last_operation: None,
            server_mappings: None,
            last_restored: None,
            restored_from_backup: None,
            extra: Map::new(),
        }
    }
}

/// Contents of `backup_info.json` inside a backup slot.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BackupInfo {
    #[serde(with = "timestamp")]
    pub backup_timestamp: DateTime<Utc>,
    pub source_folder: String,
}

/// Timestamp (de)serialization that writes RFC 3339 and also accepts the
/// naive ISO-8601 form (no offset, assumed UTC) older sidecars contain.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format(value))
    }

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp `{raw}`")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => super::serialize(dt, ser),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(de)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp `{raw}`"))),
                None => Ok(None),
            }
        }
    }
}
