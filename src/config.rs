//! Configuration System
//!
//! Layered configuration: built-in defaults, the global file, workspace files,
//! then `FOLDSYNC__SECTION__KEY` environment variables. Validation reports
//! every problem at once.

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::retry::RetryPolicy;
use crate::snapshot::NoChangePolicy;
use crate::sync::SyncOptions;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use sources::global_file::global_config_path;

/// Environment variable holding the bearer token when no other source is set.
pub const API_TOKEN_ENV: &str = "FOLDSYNC_API_TOKEN";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoldConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub participant: ParticipantConfig,

    /// Synchronized folders by name
    #[serde(default)]
    pub folders: HashMap<String, FolderConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Grid node web API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_url")]
    pub url: String,

    /// Bearer token, inline.
    #[serde(default)]
    pub api_token: Option<String>,

    /// File containing the bearer token.
    #[serde(default)]
    pub api_token_file: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_node_url() -> String {
    "http://127.0.0.1:3456".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            api_token: None,
            api_token_file: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl NodeConfig {
    /// Resolve the bearer token: inline, then token file, then environment.
    pub fn resolve_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.api_token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(token.trim().to_string());
        }
        if let Some(path) = &self.api_token_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                ApiError::ConfigError(format!("Failed to read API token file {:?}: {}", path, e))
            })?;
            return Ok(text.trim().to_string());
        }
        std::env::var(API_TOKEN_ENV).map(|t| t.trim().to_string()).map_err(|_| {
            ApiError::ConfigError(format!(
                "No API token configured (set node.api_token, node.api_token_file or {})",
                API_TOKEN_ENV
            ))
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("url must be http(s): {}", self.url));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// This participant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Display name, unique within each collective
    #[serde(default)]
    pub name: Option<String>,

    /// Identity file (default: `<data_dir>/identity.json`)
    #[serde(default)]
    pub identity_path: Option<PathBuf>,
}

/// One synchronized folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Local directory being synchronized
    pub path: PathBuf,

    /// Stash and head index location (default: `<data_dir>/folders/<name>`)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Local state locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for identity, registry and per-folder state
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured data directory, else the platform data directory, else
    /// `.foldsync` under the workspace.
    pub fn resolve_data_dir(&self, workspace_root: &Path) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "foldsync")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| workspace_root.join(".foldsync"))
    }
}

/// Synchronization behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub no_change_policy: NoChangePolicy,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            no_change_policy: NoChangePolicy::default(),
            max_concurrent_reconciles: default_max_concurrent(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl SyncConfig {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            no_change_policy: self.no_change_policy,
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            retry: RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_backoff_ms),
            ),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Node(String),
    Participant(String),
    Folder(String, String),
    Sync(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Node(msg) => write!(f, "Node: {}", msg),
            ValidationError::Participant(msg) => write!(f, "Participant: {}", msg),
            ValidationError::Folder(name, msg) => write!(f, "Folder '{}': {}", name, msg),
            ValidationError::Sync(msg) => write!(f, "Sync: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FoldConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.node.validate() {
            errors.push(ValidationError::Node(e));
        }

        if let Some(name) = &self.participant.name {
            if name.trim().is_empty() {
                errors.push(ValidationError::Participant(
                    "name cannot be empty".to_string(),
                ));
            }
        }

        for (name, folder) in &self.folders {
            if folder.path.as_os_str().is_empty() {
                errors.push(ValidationError::Folder(
                    name.clone(),
                    "path cannot be empty".to_string(),
                ));
            }
        }

        if self.sync.max_concurrent_reconciles == 0 {
            errors.push(ValidationError::Sync(
                "max_concurrent_reconciles must be at least 1".to_string(),
            ));
        }
        if self.sync.retry_attempts == 0 {
            errors.push(ValidationError::Sync(
                "retry_attempts must be at least 1".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one error.
    pub fn validated(self) -> Result<Self, ApiError> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(self)
    }

    pub fn folder(&self, name: &str) -> Result<&FolderConfig, ApiError> {
        self.folders
            .get(name)
            .ok_or_else(|| ApiError::FolderNotFound(name.to_string()))
    }

    pub fn identity_path(&self, workspace_root: &Path) -> PathBuf {
        self.participant
            .identity_path
            .clone()
            .unwrap_or_else(|| self.storage.resolve_data_dir(workspace_root).join("identity.json"))
    }

    pub fn registry_path(&self, workspace_root: &Path) -> PathBuf {
        self.storage.resolve_data_dir(workspace_root).join("folders.json")
    }

    pub fn folder_state_dir(&self, workspace_root: &Path, name: &str) -> Result<PathBuf, ApiError> {
        let folder = self.folder(name)?;
        Ok(folder.state_dir.clone().unwrap_or_else(|| {
            self.storage
                .resolve_data_dir(workspace_root)
                .join("folders")
                .join(name)
        }))
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render configuration: {}", e)))
    }
}

/// Loads [`FoldConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults only.
    pub fn default() -> FoldConfig {
        FoldConfig::default()
    }

    /// Load for a workspace: defaults, global file, workspace files, environment.
    pub fn load(workspace_root: &Path) -> Result<FoldConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder.add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load from one explicit file, still honoring defaults and environment.
    pub fn load_from_file(path: &Path) -> Result<FoldConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(env_source())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn xdg_config_path() -> Option<PathBuf> {
        global_config_path()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("FOLDSYNC")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes tests that touch process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = ConfigLoader::default();
        assert!(config.folders.is_empty());
        assert_eq!(config.node.url, "http://127.0.0.1:3456");
        assert_eq!(config.sync.no_change_policy, NoChangePolicy::SkipUnchanged);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("foldsync.toml");
        std::fs::write(
            &config_file,
            r#"
[node]
url = "http://grid.example:3456"
api_token = "s3cret"

[participant]
name = "alice"

[folders.docs]
path = "/home/alice/docs"

[sync]
no_change_policy = "always_create"
max_concurrent_reconciles = 2
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&config_file).unwrap();
        assert_eq!(config.node.url, "http://grid.example:3456");
        assert_eq!(config.node.resolve_token().unwrap(), "s3cret");
        assert_eq!(config.participant.name.as_deref(), Some("alice"));
        assert_eq!(
            config.folder("docs").unwrap().path,
            PathBuf::from("/home/alice/docs")
        );
        assert_eq!(config.sync.no_change_policy, NoChangePolicy::AlwaysCreate);
        assert_eq!(config.sync.options().max_concurrent_reconciles, 2);
        assert_eq!(config.sync.retry_attempts, 3);
    }

    #[test]
    fn test_workspace_config_and_env_override() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[sync]\nretry_attempts = 5\nretry_backoff_ms = 10\n",
        )
        .unwrap();

        std::env::set_var("FOLDSYNC__SYNC__RETRY_ATTEMPTS", "7");
        let config = ConfigLoader::load(temp_dir.path());
        std::env::remove_var("FOLDSYNC__SYNC__RETRY_ATTEMPTS");

        let config = config.unwrap();
        assert_eq!(config.sync.retry_attempts, 7);
        assert_eq!(config.sync.retry_backoff_ms, 10);
    }

    #[test]
    fn test_token_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let token_file = temp_dir.path().join("token");
        std::fs::write(&token_file, "from-file\n").unwrap();

        let node = NodeConfig {
            api_token_file: Some(token_file),
            ..NodeConfig::default()
        };
        assert_eq!(node.resolve_token().unwrap(), "from-file");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = FoldConfig::default();
        config.node.url = "ftp://nope".to_string();
        config.sync.max_concurrent_reconciles = 0;
        config.folders.insert(
            "empty".to_string(),
            FolderConfig {
                path: PathBuf::new(),
                state_dir: None,
            },
        );

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_missing_folder_is_folder_not_found() {
        let config = FoldConfig::default();
        assert!(matches!(
            config.folder("nope"),
            Err(ApiError::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_state_paths_follow_data_dir() {
        let mut config = FoldConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/var/lib/foldsync"));
        config.folders.insert(
            "docs".to_string(),
            FolderConfig {
                path: PathBuf::from("/docs"),
                state_dir: None,
            },
        );

        let root = Path::new("/workspace");
        assert_eq!(
            config.identity_path(root),
            PathBuf::from("/var/lib/foldsync/identity.json")
        );
        assert_eq!(
            config.folder_state_dir(root, "docs").unwrap(),
            PathBuf::from("/var/lib/foldsync/folders/docs")
        );
    }

    #[test]
    fn test_config_renders_as_toml() {
        let text = FoldConfig::default().to_toml().unwrap();
        assert!(text.contains("[node]"));
        assert!(text.contains("no_change_policy = \"skip_unchanged\""));
    }
}
