// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Fakes stand in for the package and service managers; filesystem work
//! happens for real inside a temporary "host" tree.

#![allow(dead_code)]

use sqlwarden::context::OperationContext;
use sqlwarden::detect::DefaultLayout;
use sqlwarden::pipeline::{Confirm, PipelineState, Step};
use sqlwarden::system::{HostFilesystem, PackageFamily, PackageManager, ServiceManager, ServiceStatus};
use sqlwarden::{CaptureSink, Error, Host, Logger, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Logger whose records can be inspected afterwards
pub fn capture_logger() -> (Logger, Arc<CaptureSink>) {
    let sink = Arc::new(CaptureSink::new());
    (Logger::with_sink(sink.clone()), sink)
}

/// In-memory package database
pub struct FakePackageManager {
    family: PackageFamily,
    installed: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
    upgrade_version: Mutex<Option<String>>,
}

impl FakePackageManager {
    pub fn new(family: PackageFamily) -> Self {
        Self {
            family,
            installed: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            upgrade_version: Mutex::new(None),
        }
    }

    pub fn with_package(self, name: &str, version: &str) -> Self {
        self.installed
            .lock()
            .unwrap()
            .insert(name.to_string(), version.to_string());
        self
    }

    /// Make `operation` (`remove`, `upgrade`, `install`) fail
    pub fn fail_on(self, operation: &str) -> Self {
        *self.fail_on.lock().unwrap() = Some(operation.to_string());
        self
    }

    /// Version every upgraded package ends up at
    pub fn upgrades_to(self, version: &str) -> Self {
        *self.upgrade_version.lock().unwrap() = Some(version.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn version_of(&self, name: &str) -> Option<String> {
        self.installed.lock().unwrap().get(name).cloned()
    }

    fn record(&self, call: String) -> Result<()> {
        let operation = call.split_whitespace().next().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(call);
        if self.fail_on.lock().unwrap().as_deref() == Some(operation.as_str()) {
            return Err(Error::command("fake-pm", format!("{} failed", operation)));
        }
        Ok(())
    }
}

impl PackageManager for FakePackageManager {
    fn family(&self) -> PackageFamily {
        self.family
    }

    fn installed_packages(&self) -> Result<Vec<String>> {
        Ok(self.installed.lock().unwrap().keys().cloned().collect())
    }

    fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.installed.lock().unwrap().contains_key(name))
    }

    fn describe(&self, name: &str) -> Result<Option<String>> {
        let installed = self.installed.lock().unwrap();
        Ok(installed.get(name).map(|version| match self.family {
            PackageFamily::Debian => format!("install ok installed {}", version),
            PackageFamily::RedHat => format!("{} x86_64", version),
        }))
    }

    fn remove(&self, names: &[String], purge: bool) -> Result<()> {
        let flag = if purge { " --purge" } else { "" };
        self.record(format!("remove {}{}", names.join(" "), flag))?;
        let mut installed = self.installed.lock().unwrap();
        for name in names {
            installed.remove(name);
        }
        Ok(())
    }

    fn install(&self, names: &[String]) -> Result<()> {
        self.record(format!("install {}", names.join(" ")))?;
        let mut installed = self.installed.lock().unwrap();
        for name in names {
            installed.insert(name.clone(), "latest".to_string());
        }
        Ok(())
    }

    fn upgrade(&self, names: &[String]) -> Result<()> {
        self.record(format!("upgrade {}", names.join(" ")))?;
        if let Some(version) = self.upgrade_version.lock().unwrap().clone() {
            let mut installed = self.installed.lock().unwrap();
            for name in names {
                installed.insert(name.clone(), version.clone());
            }
        }
        Ok(())
    }

    fn install_versions(&self, packages: &[(String, String)]) -> Result<()> {
        let spec: Vec<String> = packages.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        self.record(format!("install {}", spec.join(" ")))?;
        let mut installed = self.installed.lock().unwrap();
        for (name, version) in packages {
            installed.insert(name.clone(), version.clone());
        }
        Ok(())
    }

    fn update_cache(&self) -> Result<()> {
        self.calls.lock().unwrap().push("update-cache".to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Unit {
    active: bool,
    enabled: bool,
}

/// In-memory service manager
#[derive(Default)]
pub struct FakeServiceManager {
    units: Mutex<BTreeMap<String, Unit>>,
    calls: Mutex<Vec<String>>,
    fail_start: Mutex<bool>,
    never_runs: Mutex<bool>,
}

impl FakeServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(self, name: &str, active: bool, enabled: bool) -> Self {
        self.units
            .lock()
            .unwrap()
            .insert(name.to_string(), Unit { active, enabled });
        self
    }

    /// The next `start` fails; later ones succeed
    pub fn failing_start(self) -> Self {
        *self.fail_start.lock().unwrap() = true;
        self
    }

    /// Units report active but their main process never runs
    pub fn never_running(self) -> Self {
        *self.never_runs.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn active(&self, name: &str) -> bool {
        self.units.lock().unwrap().get(name).is_some_and(|u| u.active)
    }

    pub fn remove_unit(&self, name: &str) {
        self.units.lock().unwrap().remove(name);
    }

    fn update(&self, call: &str, name: &str, f: impl FnOnce(&mut Unit)) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", call, name));
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(name)
            .ok_or_else(|| Error::command("fake-systemctl", format!("unit {} not found", name)))?;
        f(unit);
        Ok(())
    }
}

impl ServiceManager for FakeServiceManager {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.units.lock().unwrap().contains_key(name))
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.active(name))
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.units.lock().unwrap().get(name).is_some_and(|u| u.enabled))
    }

    fn start(&self, name: &str) -> Result<()> {
        let mut fail = self.fail_start.lock().unwrap();
        if *fail {
            *fail = false;
            self.calls.lock().unwrap().push(format!("start {}", name));
            return Err(Error::command("fake-systemctl", format!("{} failed to start", name)));
        }
        self.update("start", name, |u| u.active = true)
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.update("stop", name, |u| u.active = false)
    }

    fn enable(&self, name: &str) -> Result<()> {
        self.update("enable", name, |u| u.enabled = true)
    }

    fn disable(&self, name: &str) -> Result<()> {
        self.update("disable", name, |u| u.enabled = false)
    }

    fn status(&self, name: &str) -> Result<ServiceStatus> {
        let active = self.active(name);
        Ok(ServiceStatus {
            active,
            running: active && !*self.never_runs.lock().unwrap(),
        })
    }
}

/// Confirmation that always declines
pub struct Decline;

impl Confirm for Decline {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Step that records `execute:<name>` and `rollback:<name>`
pub struct RecordingStep {
    name: String,
    journal: Journal,
    fail: bool,
    refuse: bool,
}

impl RecordingStep {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail: false,
            refuse: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Fail in `validate`, before executing
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }
}

impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, _state: &PipelineState) -> Result<()> {
        if self.refuse {
            return Err(Error::Validation(format!("{} refused", self.name)));
        }
        Ok(())
    }

    fn execute(&self, _ctx: &OperationContext, _state: &mut PipelineState) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("execute:{}", self.name));
        if self.fail {
            return Err(Error::Execution(format!("{} failed", self.name)));
        }
        Ok(())
    }

    fn rollback(&self, _ctx: &OperationContext, _state: &PipelineState) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("rollback:{}", self.name));
        Ok(())
    }
}

/// Populate `dir` with a small but recognizable data directory
pub fn create_data_dir(dir: &Path) {
    fs::create_dir_all(dir.join("mysql")).unwrap();
    fs::create_dir_all(dir.join("shop")).unwrap();
    fs::write(dir.join("ibdata1"), vec![7u8; 64 * 1024]).unwrap();
    fs::write(dir.join("auto.cnf"), "[auto]\nserver-uuid=3e11fa47-71ca-11e1-9e33-c80aa9429562\n").unwrap();
    fs::write(dir.join("ib_logfile0"), vec![1u8; 4096]).unwrap();
    fs::write(dir.join("mysql").join("user.ibd"), b"users").unwrap();
    fs::write(dir.join("shop").join("orders.ibd"), vec![42u8; 10_000]).unwrap();
    fs::write(dir.join("shop").join("db.opt"), "default-character-set=utf8mb4\n").unwrap();
}

/// A fake root filesystem inside a temporary directory
pub struct HostLayout {
    pub temp: TempDir,
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub option_file: PathBuf,
    pub backup_root: PathBuf,
}

impl HostLayout {
    /// Data in `var/lib/mysql`, error log in `var/log/mysql`, option file
    /// naming both
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("host");
        let data_dir = root.join("var/lib/mysql");
        let log_dir = root.join("var/log/mysql");
        let option_file = root.join("etc/mysql/mysql.conf.d/mysqld.cnf");
        let backup_root = root.join("var/backups/sqlwarden");

        create_data_dir(&data_dir);
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(log_dir.join("error.log"), "2024-01-01T00:00:00Z 0 [System] ready\n").unwrap();
        fs::write(log_dir.join("error.log.1"), "older\n").unwrap();
        fs::create_dir_all(option_file.parent().unwrap()).unwrap();
        fs::write(
            &option_file,
            format!(
                "[client]\nport = 3306\n\n[mysqld]\nuser = mysql\ndatadir = {}\nlog_error = {}\n",
                data_dir.display(),
                log_dir.join("error.log").display()
            ),
        )
        .unwrap();

        Self {
            temp,
            root,
            data_dir,
            log_dir,
            option_file,
            backup_root,
        }
    }

    /// Host wired to the given fakes and this tree
    pub fn host(&self, packages: Arc<FakePackageManager>, services: Arc<FakeServiceManager>, logger: Logger) -> Host {
        Host::new(
            PackageFamily::Debian,
            packages,
            services,
            Arc::new(HostFilesystem::new(logger.clone())),
            logger,
        )
        .with_config_files(vec![self.option_file.clone()])
        .with_default_layout(DefaultLayout {
            data_dir: self.data_dir.clone(),
            log_dir: self.log_dir.clone(),
            mariadb_log_dir: self.root.join("var/log/mariadb"),
        })
        .with_verify_policy(2, Duration::from_millis(1))
    }
}

/// A Debian MySQL 8.0 installation with a running, enabled `mysql` unit
pub fn mysql_fakes() -> (Arc<FakePackageManager>, Arc<FakeServiceManager>) {
    let packages = FakePackageManager::new(PackageFamily::Debian)
        .with_package("mysql-server-8.0", "8.0.36-0ubuntu0.22.04.1")
        .with_package("mysql-client", "8.0.36-0ubuntu0.22.04.1")
        .with_package("libc6", "2.35-0ubuntu3");
    let services = FakeServiceManager::new().with_unit("mysql", true, true);
    (Arc::new(packages), Arc::new(services))
}
