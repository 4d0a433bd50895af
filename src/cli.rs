// src/cli.rs

//! Command-line interface definitions

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use sqlwarden::OperationConfig;
use sqlwarden::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sqlwarden")]
#[command(author, version, about = "Safe lifecycle management for MySQL and MariaDB servers", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by the mutating operations
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Skip the backup step
    #[arg(long)]
    pub no_backup: bool,

    /// Directory that receives backups
    #[arg(long)]
    pub backup_root: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

impl RunArgs {
    /// Overlay these flags on the file configuration
    pub fn apply(&self, config: &mut OperationConfig) {
        if self.no_backup {
            config.backup.enabled = false;
        }
        if let Some(root) = &self.backup_root {
            config.backup.root = root.clone();
        }
        if self.yes {
            config.assume_yes = true;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the detected server installation
    Detect {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the server packages
    Remove {
        /// Also delete the data directory (a backup is taken first unless --no-backup)
        #[arg(long)]
        purge_data: bool,

        /// Also delete package configuration files
        #[arg(long)]
        purge_config: bool,

        /// Skip the data directory artifact check
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Upgrade the server packages
    Upgrade {
        /// Package to upgrade (repeatable; default: every installed server package)
        #[arg(short, long = "package")]
        packages: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Relocate data, log or binary log directories
    Configure {
        /// New data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// New error log directory
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// New binary log directory
        #[arg(long)]
        binlog_dir: Option<PathBuf>,

        /// Skip the data directory artifact check
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Back up the data directory and option files
    Backup {
        /// Directory that receives the backup
        #[arg(long)]
        backup_root: Option<PathBuf>,
    },

    /// Check whether a path may be removed
    CheckPath {
        /// Path to check
        path: PathBuf,

        /// Also require data directory artifacts
        #[arg(long)]
        data_dir: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
