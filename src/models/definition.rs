//! Wire representation of a model definition: a set of named file-like parts.

use crate::models::artifact::DefinitionFormat;
use serde::{Deserialize, Serialize};

/// How a part's payload is encoded.
///
/// The remote API sends `InlineBase64`; any other value is treated as the
/// literal text of the file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadType {
    #[serde(rename = "InlineBase64")]
    Base64,
    #[default]
    #[serde(rename = "InlineText", other)]
    Plain,
}

/// One file of a definition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DefinitionPart {
    /// Forward-slash path relative to the artifact folder.
    pub path: String,

    #[serde(default)]
    pub payload: String,

    #[serde(rename = "payloadType", default)]
    pub payload_type: PayloadType,
}

/// A complete definition as fetched from or submitted to the remote service.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Definition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DefinitionFormat>,

    #[serde(default)]
    pub parts: Vec<DefinitionPart>,
}

impl Definition {
    pub fn format_or(&self, fallback: DefinitionFormat) -> DefinitionFormat {
        self.format.unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_payload_type_is_plain_text() {
        let raw = r#"{"format":"TMDL","parts":[
            {"path":"a.tmdl","payload":"eA==","payloadType":"InlineBase64"},
            {"path":"b.tmdl","payload":"x","payloadType":"Whatever"},
            {"path":"c.tmdl","payload":"y"}
        ]}"#;
        let def: Definition = serde_json::from_str(raw).unwrap();
        let kinds: Vec<_> = def.parts.iter().map(|p| p.payload_type).collect();
        assert_eq!(kinds, vec![PayloadType::Base64, PayloadType::Plain, PayloadType::Plain]);
        assert_eq!(def.format, Some(DefinitionFormat::Tmdl));
    }
}
