//! Remote side: Power BI / Fabric REST calls behind the `ModelTransport`
//! trait, OAuth client-credentials tokens, and long-running-operation
//! polling.

use crate::{
    config::AppConfig,
    models::{
        definition::Definition,
        remote::{ListEnvelope, RemoteItem},
    },
    services::error::{StorageError, StorageResult},
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const OPERATION_ID_HEADER: &str = "x-ms-operation-id";
/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Everything the storage core needs from the remote service.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn list_workspaces(&self) -> StorageResult<Vec<RemoteItem>>;
    async fn list_datasets(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>>;
    async fn list_semantic_models(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>>;
    async fn list_reports(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>>;
    async fn workspace_info(&self, workspace_id: &str) -> StorageResult<RemoteItem>;
    async fn model_info(&self, workspace_id: &str, model_id: &str) -> StorageResult<RemoteItem>;
    /// Fetch a definition, waiting for the remote operation if it is asynchronous.
    async fn fetch_definition(&self, workspace_id: &str, model_id: &str) -> StorageResult<Definition>;
    /// Submit a definition, waiting for the remote operation if it is asynchronous.
    async fn submit_definition(
        &self,
        workspace_id: &str,
        model_id: &str,
        definition: &Definition,
    ) -> StorageResult<()>;
}

// --- Tokens ---

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> StorageResult<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials grant against `{authority}/{tenant}`.
pub struct ClientCredentialsTokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentialsTokenProvider {
    pub fn new(http: Client, cfg: &AppConfig) -> Self {
        let authority = format!("{}/{}", cfg.authority_url.trim_end_matches('/'), cfg.tenant_id);
        Self {
            http,
            token_url: format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/')),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn token(&self, scope: &str) -> StorageResult<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(scope) {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(StorageError::Auth("client id and secret are not configured".into()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;
        let body: TokenResponse = response.json().await?;

        let Some(value) = body.access_token else {
            let detail = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| "Unable to acquire token".into());
            return Err(StorageError::Auth(detail));
        };

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(300));
        cache.insert(
            scope.to_string(),
            CachedToken {
                value: value.clone(),
                refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
            },
        );
        debug!("acquired token for scope {}", scope);
        Ok(value)
    }
}

// --- Long-running operations ---

#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Pending,
    /// Terminal success, with the operation result when there is one.
    Succeeded(Option<Value>),
    Failed(String),
}

#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn check(&self, operation_id: &str) -> StorageResult<OperationState>;
}

/// Polls an operation until it is terminal or the retry budget runs out.
#[derive(Debug, Clone, Copy)]
pub struct OperationPoller {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl OperationPoller {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_attempts: cfg.operation_max_retries,
            delay: Duration::from_secs(cfg.operation_retry_delay_seconds),
        }
    }

    pub async fn wait<S>(&self, source: &S, operation_id: &str) -> StorageResult<Option<Value>>
    where
        S: OperationSource + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            match source.check(operation_id).await? {
                OperationState::Succeeded(result) => {
                    debug!("operation {} finished after {} checks", operation_id, attempt);
                    return Ok(result);
                }
                OperationState::Failed(detail) => return Err(StorageError::OperationFailed(detail)),
                OperationState::Pending if attempt < self.max_attempts => {
                    tokio::time::sleep(self.delay).await;
                }
                OperationState::Pending => {}
            }
        }
        warn!("operation {} still running after {} checks", operation_id, self.max_attempts);
        Err(StorageError::OperationTimeout {
            attempts: self.max_attempts,
        })
    }
}

/// Map an operation status document onto [`OperationState`]; unknown
/// statuses are treated as terminal.
pub fn classify_status(body: &Value) -> OperationState {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    match status.as_str() {
        "succeeded" => OperationState::Succeeded(None),
        "failed" => {
            let detail = body.get("error").unwrap_or(body);
            OperationState::Failed(detail.to_string())
        }
        "running" | "notstarted" | "inprogress" => OperationState::Pending,
        _ => OperationState::Succeeded(Some(body.clone())),
    }
}

/// Pull the definition out of a getDefinition response or operation result.
pub fn extract_definition(body: Value) -> StorageResult<Definition> {
    let raw = match body {
        Value::Object(mut map) if map.contains_key("definition") => map.remove("definition").unwrap_or_default(),
        Value::Object(map) if map.contains_key("parts") => Value::Object(map),
        _ => return Err(StorageError::Remote("No definition found in response".into())),
    };
    Ok(serde_json::from_value(raw)?)
}

// --- Fabric / Power BI client ---

pub struct FabricClient {
    http: Client,
    fabric_api_base: String,
    powerbi_api_base: String,
    fabric_scope: String,
    powerbi_scope: String,
    tokens: Arc<dyn TokenProvider>,
    poller: OperationPoller,
}

impl FabricClient {
    pub fn new(cfg: &AppConfig) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .build()?;
        let tokens = Arc::new(ClientCredentialsTokenProvider::new(http.clone(), cfg));
        Ok(Self::with_token_provider(http, cfg, tokens))
    }

    pub fn with_token_provider(http: Client, cfg: &AppConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            fabric_api_base: cfg.fabric_api_base.trim_end_matches('/').to_string(),
            powerbi_api_base: cfg.powerbi_api_base.trim_end_matches('/').to_string(),
            fabric_scope: cfg.fabric_scope.clone(),
            powerbi_scope: cfg.powerbi_scope.clone(),
            tokens,
            poller: OperationPoller::from_config(cfg),
        }
    }

    fn fabric_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.fabric_api_base, endpoint.trim_start_matches('/'))
    }

    fn powerbi_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.powerbi_api_base, endpoint.trim_start_matches('/'))
    }

    async fn fabric(&self, req: RequestBuilder) -> StorageResult<Response> {
        let token = self.tokens.token(&self.fabric_scope).await?;
        send(req.bearer_auth(token)).await
    }

    async fn powerbi_list(&self, endpoint: &str) -> StorageResult<Vec<RemoteItem>> {
        let token = self.tokens.token(&self.powerbi_scope).await?;
        let response = send(self.http.get(self.powerbi_url(endpoint)).bearer_auth(token)).await?;
        Ok(response.json::<ListEnvelope>().await?.value)
    }

    /// Body of a 200 response, or the operation result of a 202.
    async fn settle(&self, response: Response) -> StorageResult<Option<Value>> {
        if response.status() == StatusCode::ACCEPTED {
            let operation_id = response
                .headers()
                .get(OPERATION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| StorageError::Remote("No operation ID in response".into()))?;
            debug!("waiting for operation {}", operation_id);
            return self.poller.wait(self, &operation_id).await;
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(serde_json::from_str(&text)?))
        }
    }
}

async fn send(req: RequestBuilder) -> StorageResult<Response> {
    let response = req.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        Err(StorageError::Auth(format!("{status}: {body}")))
    } else {
        Err(StorageError::Remote(format!("{status}: {body}")))
    }
}

#[async_trait]
impl OperationSource for FabricClient {
    async fn check(&self, operation_id: &str) -> StorageResult<OperationState> {
        let status_url = self.fabric_url(&format!("operations/{operation_id}"));
        let body: Value = self.fabric(self.http.get(status_url)).await?.json().await?;

        match classify_status(&body) {
            OperationState::Succeeded(None) => {
                let token = self.tokens.token(&self.fabric_scope).await?;
                let result_url = self.fabric_url(&format!("operations/{operation_id}/result"));
                let response = self.http.get(result_url).bearer_auth(token).send().await?;
                match response.status() {
                    StatusCode::OK => Ok(OperationState::Succeeded(Some(response.json().await?))),
                    // The operation has no result document.
                    StatusCode::BAD_REQUEST => Ok(OperationState::Succeeded(Some(body))),
                    status => Err(StorageError::Remote(format!(
                        "{status} fetching result of operation {operation_id}"
                    ))),
                }
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl ModelTransport for FabricClient {
    async fn list_workspaces(&self) -> StorageResult<Vec<RemoteItem>> {
        self.powerbi_list("groups").await
    }

    async fn list_datasets(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>> {
        self.powerbi_list(&format!("groups/{workspace_id}/datasets")).await
    }

    async fn list_semantic_models(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>> {
        let url = self.fabric_url(&format!("workspaces/{workspace_id}/semanticModels"));
        let response = self.fabric(self.http.get(url)).await?;
        Ok(response.json::<ListEnvelope>().await?.value)
    }

    async fn list_reports(&self, workspace_id: &str) -> StorageResult<Vec<RemoteItem>> {
        self.powerbi_list(&format!("groups/{workspace_id}/reports")).await
    }

    async fn workspace_info(&self, workspace_id: &str) -> StorageResult<RemoteItem> {
        let url = self.fabric_url(&format!("workspaces/{workspace_id}"));
        Ok(self.fabric(self.http.get(url)).await?.json().await?)
    }

    async fn model_info(&self, workspace_id: &str, model_id: &str) -> StorageResult<RemoteItem> {
        let url = self.fabric_url(&format!("workspaces/{workspace_id}/semanticModels/{model_id}"));
        Ok(self.fabric(self.http.get(url)).await?.json().await?)
    }

    async fn fetch_definition(&self, workspace_id: &str, model_id: &str) -> StorageResult<Definition> {
        let url = self.fabric_url(&format!(
            "workspaces/{workspace_id}/semanticModels/{model_id}/getDefinition"
        ));
        let response = self.fabric(self.http.post(url).json(&json!({}))).await?;
        let body = self.settle(response).await?.unwrap_or_default();
        extract_definition(body)
    }

    async fn submit_definition(
        &self,
        workspace_id: &str,
        model_id: &str,
        definition: &Definition,
    ) -> StorageResult<()> {
        let url = self.fabric_url(&format!(
            "workspaces/{workspace_id}/semanticModels/{model_id}/updateDefinition"
        ));
        let payload = json!({ "definition": definition, "updateMetadata": false });
        let response = self.fabric(self.http.post(url).json(&payload)).await?;
        self.settle(response).await?;
        info!("submitted {} parts for model {}", definition.parts.len(), model_id);
        Ok(())
    }
}
