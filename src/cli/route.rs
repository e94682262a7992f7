//! CLI route: single route table and run context. Dispatches to the sync
//! engine and presentation.

use crate::cli::parse::{Commands, FolderCommands};
use crate::cli::presentation::{
    format_author_outcome, format_folder_list_json, format_folder_list_text, format_heads_json,
    format_heads_text, format_identity_text, format_invite, format_leave, format_membership,
    format_scan_result, format_sync_report_json, format_sync_report_text, FolderRow,
};
use crate::collective::{self, GridCollective, Invite};
use crate::config::{ConfigLoader, FoldConfig};
use crate::error::{ApiError, StorageError};
use crate::identity::Identity;
use crate::path::relpath_under;
use crate::registry::{FolderRegistry, Membership};
use crate::store::{GridClient, ObjectStore};
use crate::sync::SyncEngine;
use crate::types::FileId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Runtime context for CLI execution: workspace, loaded configuration and
/// the folder registry. Engines and the grid client are built per command.
pub struct RunContext {
    workspace_root: PathBuf,
    config: FoldConfig,
    registry: Arc<FolderRegistry>,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(ref cfg_path) => ConfigLoader::load_from_file(cfg_path)?,
            None => ConfigLoader::load(&workspace_root)?,
        }
        .validated()?;

        let registry = Arc::new(FolderRegistry::open(config.registry_path(&workspace_root))?);
        for name in config.folders.keys() {
            registry.register(name)?;
        }

        Ok(Self {
            workspace_root,
            config,
            registry,
        })
    }

    pub fn config(&self) -> &FoldConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Identity => self.handle_identity(),
            Commands::Folder { command } => match command {
                FolderCommands::List { format } => self.handle_folder_list(format),
                FolderCommands::Create { folder } => self.handle_folder_create(folder).await,
                FolderCommands::Invite { folder, nickname } => {
                    self.handle_folder_invite(folder, nickname).await
                }
                FolderCommands::Join {
                    folder,
                    invite_code,
                } => self.handle_folder_join(folder, invite_code).await,
                FolderCommands::Leave { folder } => self.handle_folder_leave(folder),
            },
            Commands::Snapshot { folder, path } => {
                let engine = self.open_engine(folder)?;
                engine.resume_pending().await?;
                let (file, absolute) = resolve_file(engine.root(), path)?;
                let content = std::fs::read(&absolute).map_err(|e| {
                    StorageError::io(format!("Failed to read {:?}", absolute), e)
                })?;
                let outcome = engine.on_local_change(&file, content).await?;
                Ok(format_author_outcome(&file, &outcome))
            }
            Commands::Scan { folder } => {
                let engine = self.open_engine(folder)?;
                engine.resume_pending().await?;
                let outcomes = engine.scan().await?;
                Ok(format_scan_result(&outcomes))
            }
            Commands::Sync { folder, format } => {
                let engine = self.open_engine(folder)?;
                engine.resume_pending().await?;
                let report = engine.sync_pass().await?;
                info!(
                    folder = %folder,
                    adopted = report.adopted().count(),
                    conflicts = report.conflicts().count(),
                    "Synchronization pass finished"
                );
                if format == "json" {
                    Ok(format_sync_report_json(&report))
                } else {
                    Ok(format_sync_report_text(&report))
                }
            }
            Commands::Heads { folder, format } => {
                let engine = self.open_engine(folder)?;
                let heads = engine.heads();
                if format == "json" {
                    Ok(format_heads_json(engine.participant(), &heads))
                } else {
                    Ok(format_heads_text(engine.participant(), &heads))
                }
            }
            Commands::Config => {
                let mut shown = self.config.clone();
                if shown.node.api_token.is_some() {
                    shown.node.api_token = Some("<redacted>".to_string());
                }
                shown.to_toml()
            }
        }
    }

    fn identity_path(&self) -> PathBuf {
        self.config.identity_path(&self.workspace_root)
    }

    /// Load the identity, creating it when a participant name is configured.
    fn identity(&self) -> Result<Identity, ApiError> {
        let path = self.identity_path();
        match &self.config.participant.name {
            Some(name) => Identity::load_or_create(&path, name),
            None if path.exists() => Identity::load(&path),
            None => Err(ApiError::ConfigError(
                "participant.name must be set to create an identity".to_string(),
            )),
        }
    }

    fn handle_identity(&self) -> Result<String, ApiError> {
        let identity = self.identity()?;
        Ok(format_identity_text(
            identity.name(),
            &identity.public_key_hex(),
            &self.identity_path(),
        ))
    }

    fn handle_folder_list(&self, format: &str) -> Result<String, ApiError> {
        let rows: Vec<FolderRow> = self
            .registry
            .list()?
            .into_iter()
            .map(|(name, membership)| FolderRow {
                path: self
                    .config
                    .folders
                    .get(&name)
                    .map(|f| f.path.display().to_string()),
                name,
                admin: membership.as_ref().map_or(false, Membership::is_admin),
                collective: membership.map(|m| m.collective),
            })
            .collect();
        if format == "json" {
            Ok(format_folder_list_json(&rows))
        } else {
            Ok(format_folder_list_text(&rows))
        }
    }

    /// Membership of a configured folder that has joined a collective.
    fn joined(&self, folder: &str) -> Result<Membership, ApiError> {
        self.config.folder(folder)?;
        self.registry
            .membership(folder)?
            .ok_or_else(|| ApiError::NotJoined(folder.to_string()))
    }

    fn ensure_not_joined(&self, folder: &str) -> Result<(), ApiError> {
        self.config.folder(folder)?;
        match self.registry.membership(folder)? {
            Some(_) => Err(ApiError::AlreadyJoined(folder.to_string())),
            None => Ok(()),
        }
    }

    async fn handle_folder_create(&self, folder: &str) -> Result<String, ApiError> {
        self.ensure_not_joined(folder)?;
        let identity = self.identity()?;
        let store = self.store()?;
        let membership = collective::create(store.as_ref(), identity.name()).await?;
        self.registry.set_membership(folder, &membership)?;
        info!(folder, collective = %membership.collective, "Created collective");
        Ok(format_membership(folder, &membership))
    }

    async fn handle_folder_invite(&self, folder: &str, nickname: &str) -> Result<String, ApiError> {
        let membership = self.joined(folder)?;
        let store = self.store()?;
        let invite = collective::invite(store.as_ref(), &membership, nickname).await?;
        Ok(format_invite(folder, nickname, &invite))
    }

    async fn handle_folder_join(&self, folder: &str, invite_code: &str) -> Result<String, ApiError> {
        self.ensure_not_joined(folder)?;
        let invite = Invite::parse(invite_code)?;
        let identity = self.identity()?;
        let store = self.store()?;
        let membership = collective::join(store.as_ref(), &invite, identity.name()).await?;
        self.registry.set_membership(folder, &membership)?;
        info!(folder, collective = %membership.collective, "Joined collective");
        Ok(format_membership(folder, &membership))
    }

    /// Forget the membership and the folder's stash and head index. The
    /// folder's files stay where they are.
    fn handle_folder_leave(&self, folder: &str) -> Result<String, ApiError> {
        let folder_config = self.config.folder(folder)?;
        let state_dir = self.config.folder_state_dir(&self.workspace_root, folder)?;
        let membership = self
            .registry
            .leave(folder)?
            .ok_or_else(|| ApiError::NotJoined(folder.to_string()))?;

        if state_dir.exists() && !folder_config.path.starts_with(&state_dir) {
            std::fs::remove_dir_all(&state_dir).map_err(|e| {
                StorageError::io(format!("Failed to remove folder state {:?}", state_dir), e)
            })?;
        }
        info!(folder, collective = %membership.collective, "Left collective");
        Ok(format_leave(folder, &membership))
    }

    fn store(&self) -> Result<Arc<dyn ObjectStore>, ApiError> {
        let node = &self.config.node;
        let client = GridClient::with_timeouts(
            &node.url,
            node.resolve_token()?,
            node.connect_timeout(),
            node.request_timeout(),
        )?;
        Ok(Arc::new(client))
    }

    fn open_engine(&self, folder: &str) -> Result<SyncEngine, ApiError> {
        let folder_config = self.config.folder(folder)?;
        let state_dir = self.config.folder_state_dir(&self.workspace_root, folder)?;
        let root = dunce::canonicalize(&folder_config.path).map_err(|e| {
            StorageError::io(format!("Folder root {:?} is not accessible", folder_config.path), e)
        })?;

        let membership = self.joined(folder)?;
        let store = self.store()?;
        let collective = Arc::new(GridCollective::new(store.clone(), folder, membership));
        Ok(SyncEngine::open(
            folder,
            root,
            &state_dir,
            store,
            self.identity()?,
            collective,
            self.config.sync.options(),
        )?)
    }
}

/// Map a user-supplied path (absolute, or relative to the folder root) to its
/// file identifier and absolute location.
fn resolve_file(root: &Path, path: &Path) -> Result<(FileId, PathBuf), ApiError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let absolute = dunce::canonicalize(&absolute)
        .map_err(|e| StorageError::io(format!("Failed to resolve {:?}", absolute), e))?;
    let relpath = relpath_under(root, &absolute)?;
    Ok((FileId::new(&relpath)?, absolute))
}
