use crate::models::artifact::DefinitionFormat;
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Serialize, Serializer};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

const ENV_PREFIX: &str = "PBI_MANAGER_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once in `main`
/// and handed to each component.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,

    /// Root of the artifact tree (`{data}/{workspace}/{type}/{id}`).
    pub data_folder: PathBuf,
    /// Primary root for user supplied relative folder paths.
    pub download_folder: PathBuf,
    pub semantic_models_folder_name: String,
    pub backup_folder_name: String,
    pub use_workspace_id_in_path: bool,

    pub enable_auto_backup: bool,
    pub backup_on_update: bool,
    pub store_artifact_metadata: bool,
    pub definition_format: DefinitionFormat,
    pub parallel_bulk_workers: usize,

    pub http_timeout_seconds: u64,
    pub operation_max_retries: u32,
    pub operation_retry_delay_seconds: u64,

    pub fabric_api_base: String,
    pub powerbi_api_base: String,
    pub authority_url: String,
    /// Reported by `GET /config` only as a presence flag.
    #[serde(rename = "powerbi_tenant_present", serialize_with = "serialize_present")]
    pub tenant_id: String,
    #[serde(rename = "powerbi_client_present", serialize_with = "serialize_present")]
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub powerbi_scope: String,
    pub fabric_scope: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Power BI / Fabric semantic model manager")]
pub struct Args {
    /// Host to bind to (overrides PBI_MANAGER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PBI_MANAGER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root folder for downloaded artifacts (overrides PBI_MANAGER_DATA_FOLDER)
    #[arg(long)]
    pub data_folder: Option<PathBuf>,

    /// Primary lookup folder for relative model paths (overrides PBI_MANAGER_DOWNLOAD_FOLDER)
    #[arg(long)]
    pub download_folder: Option<PathBuf>,

    /// Use the workspace name instead of its id as the workspace folder
    #[arg(long)]
    pub use_workspace_name: bool,

    /// Disable automatic backups on download and before edits
    #[arg(long)]
    pub no_auto_backup: bool,

    /// Number of models processed concurrently by bulk operations (1-10)
    #[arg(long)]
    pub bulk_workers: Option<usize>,

    /// Fabric REST base URL (overrides PBI_MANAGER_FABRIC_API_BASE)
    #[arg(long)]
    pub fabric_api_base: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env_string("HOST", "0.0.0.0");
        let env_port: u16 = env_parse("PORT", 8000)?;
        let env_data = PathBuf::from(env_string("DATA_FOLDER", "./data"));
        let env_download = PathBuf::from(env_string("DOWNLOAD_FOLDER", "./downloads"));
        let env_workers: usize = env_parse("PARALLEL_BULK_WORKERS", 5)?;
        let env_fabric = env_string("FABRIC_API_BASE", "https://api.fabric.microsoft.com/v1");
        let use_workspace_id: bool = env_parse("USE_WORKSPACE_ID_IN_PATH", true)?;
        let auto_backup: bool = env_parse("ENABLE_AUTO_BACKUP", true)?;
        let definition_format: DefinitionFormat = env_parse("DEFINITION_FORMAT", DefinitionFormat::Tmdl)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_folder: args.data_folder.unwrap_or(env_data),
            download_folder: args.download_folder.unwrap_or(env_download),
            semantic_models_folder_name: env_string("SEMANTIC_MODELS_FOLDER_NAME", "semantic-models"),
            backup_folder_name: env_string("BACKUP_FOLDER_NAME", "backup"),
            use_workspace_id_in_path: use_workspace_id && !args.use_workspace_name,
            enable_auto_backup: auto_backup && !args.no_auto_backup,
            backup_on_update: env_parse("BACKUP_ON_UPDATE", true)?,
            store_artifact_metadata: env_parse("STORE_ARTIFACT_METADATA", true)?,
            definition_format,
            parallel_bulk_workers: args.bulk_workers.unwrap_or(env_workers),
            http_timeout_seconds: env_parse("HTTP_TIMEOUT_SECONDS", 30)?,
            operation_max_retries: env_parse("OPERATION_MAX_RETRIES", 30)?,
            operation_retry_delay_seconds: env_parse("OPERATION_RETRY_DELAY_SECONDS", 5)?,
            fabric_api_base: args.fabric_api_base.unwrap_or(env_fabric),
            powerbi_api_base: env_string("POWERBI_API_BASE", "https://api.powerbi.com/v1.0/myorg"),
            authority_url: env_string("AUTHORITY_URL", "https://login.microsoftonline.com"),
            tenant_id: env_string("TENANT_ID", ""),
            client_id: env_string("CLIENT_ID", ""),
            client_secret: env_string("CLIENT_SECRET", ""),
            powerbi_scope: env_string(
                "POWERBI_SCOPE",
                "https://analysis.windows.net/powerbi/api/.default",
            ),
            fabric_scope: env_string("FABRIC_SCOPE", "https://api.fabric.microsoft.com/.default"),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.parallel_bulk_workers) {
            bail!(
                "parallel bulk workers must be between 1 and 10 (got {})",
                self.parallel_bulk_workers
            );
        }
        if self.http_timeout_seconds == 0 || self.operation_retry_delay_seconds == 0 {
            bail!("timeout and delay values must be positive");
        }
        if self.operation_max_retries == 0 {
            bail!("operation retry budget must be at least one attempt");
        }
        if self.semantic_models_folder_name.is_empty() || self.backup_folder_name.is_empty() {
            bail!("artifact and backup folder names must not be empty");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn serialize_present<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(!value.is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env::var(format!("{ENV_PREFIX}{key}")).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{ENV_PREFIX}{key}");
    match env::var(&name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
impl AppConfig {
    /// Configuration rooted in a scratch directory, used by service and route tests.
    pub fn for_tests(root: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            data_folder: root.join("data"),
            download_folder: root.join("downloads"),
            semantic_models_folder_name: "semantic-models".into(),
            backup_folder_name: "backup".into(),
            use_workspace_id_in_path: true,
            enable_auto_backup: true,
            backup_on_update: true,
            store_artifact_metadata: true,
            definition_format: DefinitionFormat::Tmdl,
            parallel_bulk_workers: 2,
            http_timeout_seconds: 5,
            operation_max_retries: 3,
            operation_retry_delay_seconds: 1,
            fabric_api_base: "http://fabric.invalid/v1".into(),
            powerbi_api_base: "http://powerbi.invalid/v1.0/myorg".into(),
            authority_url: "http://login.invalid".into(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            powerbi_scope: String::new(),
            fabric_scope: String::new(),
        }
    }
}
