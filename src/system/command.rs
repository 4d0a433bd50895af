// src/system/command.rs

//! Running external tools
//!
//! Spawn failures map to `Error::Command`; a non-zero exit is only an
//! error for `run_checked`, since queries like `systemctl is-active`
//! report their answer through the exit status.

use crate::error::{Error, Result};
use std::process::Command;
use tracing::debug;

/// Captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// First non-empty line of stdout, trimmed
    pub fn first_line(&self) -> &str {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// Run `program` with `args` and extra environment variables
pub fn run_with_env(program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<CommandOutput> {
    debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .envs(env.iter().copied())
        .output()
        .map_err(|e| Error::command(program, format!("failed to spawn: {}", e)))?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run `program` with `args`
pub fn run(program: &str, args: &[&str]) -> Result<CommandOutput> {
    run_with_env(program, args, &[])
}

/// Run and fail on a non-zero exit status
pub fn run_checked(program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<CommandOutput> {
    let output = run_with_env(program, args, env)?;
    if !output.success() {
        let detail = output.stderr.trim();
        return Err(Error::command(
            program,
            format!(
                "exit status {}: {}",
                output.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                if detail.is_empty() { output.first_line() } else { detail }
            ),
        ));
    }
    Ok(output)
}
