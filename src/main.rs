// src/main.rs

use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Detect { json } => commands::cmd_detect(&cli.config, json),
        Commands::Remove {
            purge_data,
            purge_config,
            force,
            run,
        } => commands::cmd_remove(&cli.config, purge_data, purge_config, force, &run),
        Commands::Upgrade { packages, run } => commands::cmd_upgrade(&cli.config, packages, &run),
        Commands::Configure {
            data_dir,
            log_dir,
            binlog_dir,
            force,
            run,
        } => commands::cmd_configure(&cli.config, data_dir, log_dir, binlog_dir, force, &run),
        Commands::Backup { backup_root } => commands::cmd_backup(&cli.config, backup_root),
        Commands::CheckPath { path, data_dir } => commands::cmd_check_path(&path, data_dir),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "sqlwarden", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(commands::EXIT_FAILED)
        }
    }
}
