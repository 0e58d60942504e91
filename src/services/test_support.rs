//! In-memory `ModelTransport` used by service and route tests.

use crate::{
    models::{
        artifact::DefinitionFormat,
        definition::{Definition, DefinitionPart, PayloadType},
        remote::RemoteItem,
    },
    services::{
        error::{StorageError, StorageResult},
        fabric_client::ModelTransport,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde_json::Map;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

pub const OLD_SERVER: &str = "old-srv.database.windows.net";

fn part(path: &str, text: &str) -> DefinitionPart {
    DefinitionPart {
        path: path.to_string(),
        payload: general_purpose::STANDARD.encode(text),
        payload_type: PayloadType::Base64,
    }
}

/// A minimal but complete model whose Sales table points at [`OLD_SERVER`].
pub fn sample_definition() -> Definition {
    Definition {
        format: Some(DefinitionFormat::Tmdl),
        parts: vec![
            part("definition.pbism", "{\"version\":\"4.0\"}"),
            part("definition/database.tmdl", "database Db\n"),
            part("definition/model.tmdl", "model Model\n"),
            part(
                "definition/tables/Sales.tmdl",
                &format!("source = Sql.Database(\"{OLD_SERVER}\", \"db\")\n"),
            ),
        ],
    }
}

fn item(id: &str, name: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        name: name.to_string(),
        extra: Map::new(),
    }
}

#[derive(Default)]
pub struct StubTransport {
    definitions: Mutex<HashMap<String, Definition>>,
    pub submitted: Mutex<Vec<(String, String, Definition)>>,
    pub fetches: AtomicUsize,
}

impl StubTransport {
    pub fn with_models(ids: &[&str]) -> Self {
        let stub = Self::default();
        {
            let mut defs = stub.definitions.lock().unwrap();
            for id in ids {
                defs.insert(id.to_string(), sample_definition());
            }
        }
        stub
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<(String, String, Definition)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelTransport for StubTransport {
    async fn list_workspaces(&self) -> StorageResult<Vec<RemoteItem>> {
        Ok(vec![item("ws-1", "Sales")])
    }

    async fn list_datasets(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>> {
        self.list_semantic_models(workspace_id).await
    }

    async fn list_semantic_models(&self, _workspace_id: &str) -> StorageResult<Vec<RemoteItem>> {
        let defs = self.definitions.lock().unwrap();
        let mut ids: Vec<_> = defs.keys().cloned().collect();
        ids.sort();
        Ok(ids.iter().map(|id| item(id, &format!("Model {id}"))).collect())
    }

    async fn list_reports(&self, _workspace_id: &str) -> StorageResult<Vec<RemoteItem>> {
        Ok(Vec::new())
    }

    async fn workspace_info(&self, workspace_id: &str) -> StorageResult<RemoteItem> {
        Ok(item(workspace_id, "Sales"))
    }

    async fn model_info(&self, _workspace_id: &str, model_id: &str) -> StorageResult<RemoteItem> {
        Ok(item(model_id, &format!("Model {model_id}")))
    }

    async fn fetch_definition(&self, _workspace_id: &str, model_id: &str) -> StorageResult<Definition> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.definitions
            .lock()
            .unwrap()
            .get(model_id)
            .cloned()
            .ok_or_else(|| StorageError::Remote(format!("404 Not Found: {model_id}")))
    }

    async fn submit_definition(
        &self,
        workspace_id: &str,
        model_id: &str,
        definition: &Definition,
    ) -> StorageResult<()> {
        self.submitted
            .lock()
            .unwrap()
            .push((workspace_id.to_string(), model_id.to_string(), definition.clone()));
        Ok(())
    }
}
