// src/commands/backup.rs
//! Standalone backup and path checks

use super::{EXIT_PROTECTED_PATH, interactive_host, load_config, require_root};
use anyhow::{Context, Result};
use sqlwarden::{Error, Logger, SafetyValidator};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

pub fn cmd_backup(config_path: &Path, backup_root: Option<PathBuf>) -> Result<ExitCode> {
    require_root("backup")?;
    let mut config = load_config(config_path)?;
    if let Some(root) = backup_root {
        config.backup.root = root;
    }

    let (host, ctx, spinner) = interactive_host(&config, "Backing up server")?;
    let snapshot = host.detector(&config).detect().context("Failed to detect installation")?;
    if snapshot.service_active() {
        warn!(
            "{} is running; the data archive may not be consistent",
            snapshot.service_name()
        );
    }

    let outcome = host.backup_engine().backup(&ctx, &snapshot, &config.backup.root);
    spinner.clear();
    let outcome = outcome.context("Backup failed")?;

    println!("Backup: {}", outcome.path.display());
    if let Some(archive) = &outcome.archive_path {
        println!("  {} ({} bytes)", archive.display(), outcome.archive_size);
    }
    for saved in &outcome.config_files {
        println!("  {} -> {}", saved.source.display(), saved.stored_as.display());
    }
    Ok(ExitCode::SUCCESS)
}

pub fn cmd_check_path(path: &Path, data_dir: bool) -> Result<ExitCode> {
    let validator = SafetyValidator::new(Logger::tracing());
    let checked = if data_dir {
        validator.validate_data_directory(path)
    } else {
        validator.validate_removal_target(path)
    };

    match checked {
        Ok(resolved) => {
            println!("OK: {} may be removed", resolved.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::ProtectedPath { path, reason }) => {
            println!("REFUSED: {} ({})", path.display(), reason);
            Ok(ExitCode::from(EXIT_PROTECTED_PATH))
        }
        Err(e) => Err(e.into()),
    }
}
