//! Items listed by the remote Power BI / Fabric APIs.
//!
//! Only the fields this service reads are modelled; everything else the
//! APIs return is kept verbatim in `extra` and passed through to clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A workspace, dataset, report or semantic model as listed remotely.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteItem {
    pub id: String,

    /// Power BI endpoints use `name`, Fabric endpoints `displayName`.
    #[serde(alias = "displayName", default)]
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteItem {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// Envelope used by both list APIs.
#[derive(Deserialize, Debug, Default)]
pub struct ListEnvelope {
    #[serde(default)]
    pub value: Vec<RemoteItem>,
}
