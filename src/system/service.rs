// src/system/service.rs

//! Service manager capability and its systemd implementation

use super::command::{run, run_checked};
use crate::error::Result;
use serde::Serialize;
use tracing::info;

/// Runtime status of a service unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// Unit is active (or activating/reloading)
    pub active: bool,
    /// Main process is running
    pub running: bool,
}

/// Operations the lifecycle core needs from the service manager
///
/// Calls are not reentrant-safe across concurrent pipeline runs on the
/// same host; callers run at most one pipeline at a time.
pub trait ServiceManager: Send + Sync {
    /// Whether a unit file for `name` exists
    fn exists(&self, name: &str) -> Result<bool>;
    fn is_active(&self, name: &str) -> Result<bool>;
    fn is_enabled(&self, name: &str) -> Result<bool>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
    fn enable(&self, name: &str) -> Result<()>;
    fn disable(&self, name: &str) -> Result<()>;
    fn status(&self, name: &str) -> Result<ServiceStatus>;
}

/// Parse `systemctl show --property=ActiveState,SubState` output
pub fn parse_show_output(stdout: &str) -> ServiceStatus {
    let mut status = ServiceStatus::default();
    for line in stdout.lines() {
        match line.split_once('=') {
            Some(("ActiveState", value)) => {
                status.active = matches!(value.trim(), "active" | "reloading" | "activating");
            }
            Some(("SubState", value)) => {
                status.running = value.trim() == "running";
            }
            _ => {}
        }
    }
    status
}

fn unit(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.service", name)
    }
}

/// systemctl-backed service manager
#[derive(Debug, Default)]
pub struct SystemdServiceManager;

impl SystemdServiceManager {
    pub fn new() -> Self {
        Self
    }
}

impl ServiceManager for SystemdServiceManager {
    fn exists(&self, name: &str) -> Result<bool> {
        let output = run(
            "systemctl",
            &["list-unit-files", "--no-legend", "--no-pager", unit(name).as_str()],
        )?;
        Ok(output.success() && !output.first_line().is_empty())
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        let output = run("systemctl", &["is-active", unit(name).as_str()])?;
        Ok(output.first_line() == "active")
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        let output = run("systemctl", &["is-enabled", unit(name).as_str()])?;
        Ok(matches!(output.first_line(), "enabled" | "enabled-runtime" | "alias"))
    }

    fn start(&self, name: &str) -> Result<()> {
        info!("Starting service {}", name);
        run_checked("systemctl", &["start", unit(name).as_str()], &[])?;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        info!("Stopping service {}", name);
        run_checked("systemctl", &["stop", unit(name).as_str()], &[])?;
        Ok(())
    }

    fn enable(&self, name: &str) -> Result<()> {
        run_checked("systemctl", &["enable", unit(name).as_str()], &[])?;
        Ok(())
    }

    fn disable(&self, name: &str) -> Result<()> {
        run_checked("systemctl", &["disable", unit(name).as_str()], &[])?;
        Ok(())
    }

    fn status(&self, name: &str) -> Result<ServiceStatus> {
        let output = run_checked(
            "systemctl",
            &["show", "--property=ActiveState,SubState", unit(name).as_str()],
            &[],
        )?;
        Ok(parse_show_output(&output.stdout))
    }
}
