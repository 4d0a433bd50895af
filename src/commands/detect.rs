// src/commands/detect.rs
//! Show the detected installation

use super::{load_config, resolve_family};
use anyhow::{Context, Result};
use sqlwarden::{Host, InstallationSnapshot, Logger};
use std::path::Path;
use std::process::ExitCode;

pub fn cmd_detect(config_path: &Path, json: bool) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let family = resolve_family(&config)?;
    let host = Host::system(family, Logger::tracing());
    let snapshot = host.detector(&config).detect().context("Failed to detect installation")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_snapshot(snapshot: &InstallationSnapshot) {
    if !snapshot.is_installed() {
        println!("No MySQL or MariaDB server installed.");
        return;
    }

    println!("Package:   {} {}", snapshot.package_name(), snapshot.version());
    if snapshot.packages().len() > 1 {
        println!("Installed: {}", snapshot.packages().join(", "));
    }
    if snapshot.service_name().is_empty() {
        println!("Service:   (none found)");
    } else {
        println!(
            "Service:   {} ({}, {})",
            snapshot.service_name(),
            if snapshot.service_active() { "active" } else { "inactive" },
            if snapshot.service_enabled() { "enabled" } else { "disabled" }
        );
    }

    let show = |label: &str, path: Option<&Path>| match path {
        Some(p) => println!("{:<10} {}", label, p.display()),
        None => println!("{:<10} -", label),
    };
    show("Data:", snapshot.data_dir());
    show("Logs:", snapshot.log_dir());
    show("Binlogs:", snapshot.binlog_dir());
    println!("Data size: {} bytes", snapshot.data_directory_size_bytes());

    if !snapshot.config_files().is_empty() {
        println!("Option files:");
        for file in snapshot.config_files() {
            println!("  {}", file.display());
        }
    }
    if !snapshot.log_files().is_empty() {
        println!("Log files: {}", snapshot.log_files().len());
    }
}
