// src/commands/mod.rs
//! Command implementations for the sqlwarden CLI

mod backup;
mod detect;
mod lifecycle;
mod progress;

pub use backup::{cmd_backup, cmd_check_path};
pub use detect::cmd_detect;
pub use lifecycle::{cmd_configure, cmd_remove, cmd_upgrade};

use anyhow::{Context, Result, bail};
use progress::{OperationSpinner, TerminalConfirm};
use sqlwarden::system::{PackageFamily, detect_family};
use sqlwarden::{Host, Logger, OperationConfig, OperationContext, OperationResult};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

pub const EXIT_FAILED: u8 = 1;
pub const EXIT_PROTECTED_PATH: u8 = 2;
pub const EXIT_CANCELLED: u8 = 3;

const OS_RELEASE: &str = "/etc/os-release";

fn load_config(path: &Path) -> Result<OperationConfig> {
    OperationConfig::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn resolve_family(config: &OperationConfig) -> Result<PackageFamily> {
    match config.server.family.fixed() {
        Some(family) => Ok(family),
        None => detect_family(Path::new(OS_RELEASE)).context("Failed to determine the packaging family"),
    }
}

fn require_root(operation: &str) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        bail!("{} must be run as root", operation);
    }
    Ok(())
}

/// Host plus a terminal spinner wired in as progress and confirmation
fn interactive_host(config: &OperationConfig, operation: &str) -> Result<(Host, OperationContext, Arc<OperationSpinner>)> {
    let family = resolve_family(config)?;
    let logger = Logger::tracing();
    let spinner = Arc::new(OperationSpinner::new(operation));
    let host = Host::system(family, logger.clone()).with_confirm(Arc::new(TerminalConfirm::new(spinner.clone())));
    let ctx = OperationContext::new(logger).with_progress(spinner.clone());
    Ok((host, ctx, spinner))
}

/// Print the outcome and map it to an exit code
fn report(result: &OperationResult) -> ExitCode {
    if result.success {
        println!(
            "{} completed: {}/{} steps in {:.1}s",
            result.operation,
            result.steps_completed,
            result.steps_total,
            result.elapsed.as_secs_f64()
        );
        if let Some(path) = &result.backup_path {
            println!("Backup: {}", path.display());
        }
        return ExitCode::SUCCESS;
    }

    if result.is_cancelled() {
        println!("{} cancelled; nothing was changed.", result.operation);
        return ExitCode::from(EXIT_CANCELLED);
    }

    if let Some(failure) = &result.failure {
        eprintln!("{}", failure);
        eprintln!("Run id: {}", failure.run_id);
        for rollback in &failure.rollback_failures {
            eprintln!("  rollback of '{}' failed: {}", rollback.step, rollback.error);
        }
    }
    if let Some(info) = &result.rollback_info {
        if let Some(path) = &info.backup_path {
            eprintln!("Backup: {}", path.display());
        }
        if !info.previous_version.is_empty() {
            eprintln!("Previous version: {}", info.previous_version);
        }
        eprintln!("Recovery:");
        for (i, line) in info.instructions.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, line);
        }
    }

    if result.is_protected_path() {
        ExitCode::from(EXIT_PROTECTED_PATH)
    } else {
        ExitCode::from(EXIT_FAILED)
    }
}
