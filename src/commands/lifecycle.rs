// src/commands/lifecycle.rs
//! Remove, upgrade and configure commands

use super::{interactive_host, load_config, report, require_root};
use crate::cli::RunArgs;
use anyhow::Result;
use sqlwarden::{run_configure, run_remove, run_upgrade};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

pub fn cmd_remove(config_path: &Path, purge_data: bool, purge_config: bool, force: bool, run: &RunArgs) -> Result<ExitCode> {
    require_root("remove")?;
    let mut config = load_config(config_path)?;
    run.apply(&mut config);
    config.remove.purge_data |= purge_data;
    config.remove.purge_config |= purge_config;
    config.force |= force;

    info!(
        "Removing server (purge_data={}, purge_config={})",
        config.remove.purge_data, config.remove.purge_config
    );
    let (host, ctx, spinner) = interactive_host(&config, "Removing server")?;
    let result = run_remove(&host, &ctx, &config);
    spinner.clear();
    Ok(report(&result))
}

pub fn cmd_upgrade(config_path: &Path, packages: Vec<String>, run: &RunArgs) -> Result<ExitCode> {
    require_root("upgrade")?;
    let mut config = load_config(config_path)?;
    run.apply(&mut config);
    if !packages.is_empty() {
        config.upgrade.target_packages = packages;
    }

    info!("Upgrading server packages");
    let (host, ctx, spinner) = interactive_host(&config, "Upgrading server")?;
    let result = run_upgrade(&host, &ctx, &config);
    spinner.clear();

    if result.success {
        if let Some(snapshot) = &result.snapshot {
            info!("Upgraded from {} {}", snapshot.package_name(), snapshot.version());
        }
    }
    Ok(report(&result))
}

pub fn cmd_configure(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    binlog_dir: Option<PathBuf>,
    force: bool,
    run: &RunArgs,
) -> Result<ExitCode> {
    require_root("configure")?;
    let mut config = load_config(config_path)?;
    run.apply(&mut config);
    if data_dir.is_some() {
        config.layout.data_dir = data_dir;
    }
    if log_dir.is_some() {
        config.layout.log_dir = log_dir;
    }
    if binlog_dir.is_some() {
        config.layout.binlog_dir = binlog_dir;
    }
    config.force |= force;
    config.validate()?;

    if config.desired_layout().is_empty() {
        anyhow::bail!("nothing to configure: pass --data-dir, --log-dir or --binlog-dir, or set [layout]");
    }

    let (host, ctx, spinner) = interactive_host(&config, "Relocating directories")?;
    let result = run_configure(&host, &ctx, &config);
    spinner.clear();
    Ok(report(&result))
}
