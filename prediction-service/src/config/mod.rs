use secrecy::Secret;
use service_core::config::{self as core_config, get_env, get_env_parsed};
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;

/// Public Boltz-1 checkpoint.
pub const DEFAULT_CHECKPOINT_URL: &str =
    "https://huggingface.co/boltz-community/boltz-1/resolve/main/boltz1_conf.ckpt";

/// Chemical Component Dictionary the checkpoint is paired with.
pub const DEFAULT_CCD_URL: &str =
    "https://huggingface.co/boltz-community/boltz-1/resolve/main/ccd.pkl";

const DEFAULT_GCS_BASE_URL: &str = "https://storage.googleapis.com";
const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_OBJECT_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub common: core_config::Config,
    pub storage: StorageConfig,
    pub scratch_dir: PathBuf,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend; buckets are its subdirectories.
    pub local_root: PathBuf,
    pub gcs_base_url: String,
    pub gcs_access_token: Option<Secret<String>>,
    pub timeout_secs: u64,
    pub max_object_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Gcs,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub endpoint: Option<String>,
    pub cache_dir: PathBuf,
    pub checkpoint_url: String,
    pub ccd_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Echo,
    Remote,
}

impl PredictionConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        let default_scratch = env::temp_dir().join("prediction-scratch");

        let engine_kind: EngineKind = get_env("ENGINE_KIND", Some("echo"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        if is_prod && engine_kind == EngineKind::Echo {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ENGINE_KIND=echo is a development stub and cannot run in production"
            )));
        }

        Ok(PredictionConfig {
            common,
            storage: StorageConfig {
                backend: get_env("STORAGE_BACKEND", Some("local"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                local_root: env::var("STORAGE_LOCAL_ROOT")
                    .unwrap_or_else(|_| "storage".to_string())
                    .into(),
                gcs_base_url: env::var("GCS_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_GCS_BASE_URL.to_string()),
                gcs_access_token: env::var("GCS_ACCESS_TOKEN").ok().map(Secret::new),
                // Tunables keep their defaults in every environment.
                timeout_secs: get_env_parsed(
                    "STORAGE_TIMEOUT_SECS",
                    DEFAULT_STORAGE_TIMEOUT_SECS,
                    false,
                )?,
                max_object_bytes: get_env_parsed(
                    "STORAGE_MAX_OBJECT_BYTES",
                    DEFAULT_MAX_OBJECT_BYTES,
                    false,
                )?,
            },
            scratch_dir: env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(default_scratch),
            engine: EngineConfig {
                kind: engine_kind,
                endpoint: env::var("ENGINE_ENDPOINT").ok(),
                cache_dir: get_env("ENGINE_CACHE_DIR", Some("model-cache"), is_prod)?.into(),
                checkpoint_url: env::var("ENGINE_CHECKPOINT_URL")
                    .unwrap_or_else(|_| DEFAULT_CHECKPOINT_URL.to_string()),
                ccd_url: env::var("ENGINE_CCD_URL")
                    .unwrap_or_else(|_| DEFAULT_CCD_URL.to_string()),
            },
        })
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "gcs" => Ok(StorageBackend::Gcs),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "echo" => Ok(EngineKind::Echo),
            "remote" => Ok(EngineKind::Remote),
            _ => Err(format!("Invalid engine kind: {}", s)),
        }
    }
}
