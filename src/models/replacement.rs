//! Server-name mappings and the records produced by keyword replacement.

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, SeqAccess, Visitor},
    ser::SerializeMap,
};
use std::{collections::BTreeMap, fmt, path::PathBuf};

/// One substitution rule: every case-insensitive occurrence of `old_server`
/// becomes `new_server` verbatim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerMapping {
    pub old_server: String,
    pub new_server: String,
}

impl ServerMapping {
    pub fn new(old_server: impl Into<String>, new_server: impl Into<String>) -> Self {
        Self {
            old_server: old_server.into(),
            new_server: new_server.into(),
        }
    }
}

/// Ordered list of mappings, applied first to last.
///
/// Accepts either a JSON object (`{"old": "new"}`, kept in document order) or
/// a list of `{old_server, new_server}` objects. Serializes as an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerMappings(pub Vec<ServerMapping>);

impl ServerMappings {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerMapping> {
        self.0.iter()
    }
}

impl From<Vec<ServerMapping>> for ServerMappings {
    fn from(value: Vec<ServerMapping>) -> Self {
        Self(value)
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ServerMappings {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(o, n)| ServerMapping::new(o, n)).collect())
    }
}

impl Serialize for ServerMappings {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let mut map = ser.serialize_map(Some(self.0.len()))?;
        for mapping in &self.0 {
            map.serialize_entry(&mapping.old_server, &mapping.new_server)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ServerMappings {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        struct MappingsVisitor;

        impl<'de> Visitor<'de> for MappingsVisitor {
            type Value = ServerMappings;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of old -> new server names or a list of mappings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some((old_server, new_server)) = access.next_entry::<String, String>()? {
                    out.push(ServerMapping {
                        old_server,
                        new_server,
                    });
                }
                Ok(ServerMappings(out))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(mapping) = access.next_element::<ServerMapping>()? {
                    out.push(mapping);
                }
                Ok(ServerMappings(out))
            }
        }

        de.deserialize_any(MappingsVisitor)
    }
}

/// Overall outcome of a replacement run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStatus {
    Updated,
    NoChanges,
    Failed,
}

impl ReplacementStatus {
    /// `no_changes` is a successful no-op, not a failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, ReplacementStatus::Failed)
    }
}

/// What happened to a single candidate file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOutcome {
    Rewritten {
        path: PathBuf,
        counts: BTreeMap<String, usize>,
    },
    Unchanged {
        path: PathBuf,
    },
    /// Read or write failed; the batch carried on without this file.
    Skipped {
        path: PathBuf,
        reason: String,
    },
}

/// Replacement response contract.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReplacementReport {
    pub status: ReplacementStatus,
    pub files_updated: usize,
    pub replacements: BTreeMap<String, usize>,
    pub error: Option<String>,
}

impl ReplacementReport {
    pub fn no_changes(reason: impl Into<String>) -> Self {
        Self {
            status: ReplacementStatus::NoChanges,
            files_updated: 0,
            replacements: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ReplacementStatus::Failed,
            files_updated: 0,
            replacements: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    /// Reduce per-file outcomes into the externally visible aggregate.
    pub fn from_outcomes(outcomes: &[FileOutcome]) -> Self {
        let mut files_updated = 0;
        let mut replacements = BTreeMap::new();
        for outcome in outcomes {
            if let FileOutcome::Rewritten { counts, .. } = outcome {
                files_updated += 1;
                for (key, count) in counts {
                    *replacements.entry(key.clone()).or_insert(0) += count;
                }
            }
        }

        if files_updated == 0 {
            return Self::no_changes("No matching server names found");
        }

        Self {
            status: ReplacementStatus::Updated,
            files_updated,
            replacements,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_form_keeps_document_order() {
        let mappings: ServerMappings =
            serde_json::from_str(r#"{"zeta.db": "a", "alpha.db": "b"}"#).unwrap();
        let olds: Vec<_> = mappings.iter().map(|m| m.old_server.as_str()).collect();
        assert_eq!(olds, vec!["zeta.db", "alpha.db"]);
    }

    #[test]
    fn list_form_is_accepted() {
        let mappings: ServerMappings = serde_json::from_str(
            r#"[{"old_server": "old", "new_server": "new"}]"#,
        )
        .unwrap();
        assert_eq!(mappings.0, vec![ServerMapping::new("old", "new")]);
        assert_eq!(serde_json::to_string(&mappings).unwrap(), r#"{"old":"new"}"#);
    }

    #[test]
    fn skipped_files_do_not_count_as_updates() {
        let outcomes = vec![
            FileOutcome::Skipped {
                path: "a.tmdl".into(),
                reason: "denied".into(),
            },
            FileOutcome::Unchanged {
                path: "b.tmdl".into(),
            },
        ];
        let report = ReplacementReport::from_outcomes(&outcomes);
        assert_eq!(report.status, ReplacementStatus::NoChanges);
        assert_eq!(report.files_updated, 0);
    }
}
