//! CLI parse: clap types for foldsync. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Foldsync CLI - folder synchronization over a content-addressed grid
#[derive(Parser)]
#[command(name = "foldsync")]
#[command(about = "Synchronize folders through per-file snapshot histories on a grid")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (workspace config lives in <workspace>/config)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable logging at the configured level (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging even when verbose or configured
    #[arg(long, default_value = "false", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (when output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show this participant's identity, creating it on first use
    Identity,
    /// Folder commands
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Author a snapshot for one file of a folder
    Snapshot {
        /// Configured folder name
        folder: String,
        /// File path relative to the folder root
        path: PathBuf,
    },
    /// Author snapshots for every changed file in a folder
    Scan {
        /// Configured folder name
        folder: String,
    },
    /// Run one synchronization pass against every peer
    Sync {
        /// Configured folder name
        folder: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show this participant's current heads
    Heads {
        /// Configured folder name
        folder: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum FolderCommands {
    /// List configured folders and the collectives they belong to
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Start a new collective for a folder, with this participant as administrator
    Create {
        /// Configured folder name
        folder: String,
    },
    /// Add a participant to a collective this participant administers.
    /// The printed invite code is secret and must reach the invitee privately.
    Invite {
        /// Configured folder name
        folder: String,
        /// Name the invitee will use as participant.name
        nickname: String,
    },
    /// Join a collective with an invite code
    Join {
        /// Configured folder name
        folder: String,
        /// Invite code from `foldsync folder invite`
        invite_code: String,
    },
    /// Leave a folder's collective and forget its local sync state
    Leave {
        /// Configured folder name
        folder: String,
    },
}
