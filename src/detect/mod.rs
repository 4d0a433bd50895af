// src/detect/mod.rs

//! Installation detection
//!
//! `Detector::detect` reconstructs the state of the database server on
//! this host: which packages are installed (and at what version), which
//! service unit runs it, where its data, error log and binary logs live,
//! and which option files configure it.
//!
//! Directory locations are resolved in three tiers:
//! 1. live values from a running server (`ServerClient`)
//! 2. directives in the option files (`cnf`)
//! 3. conventional defaults for the packaging family
//!
//! Missing packages, services or directories are normal outcomes. Only a
//! failure to list installed packages at all is an error.

pub mod client;
pub mod cnf;
pub mod version;

pub use client::{MysqlClient, ServerClient};
pub use version::extract_version_token;

use crate::error::Result;
use crate::heuristics;
use crate::logging::Logger;
use crate::system::{PackageFamily, PackageManager, ServiceManager, directory_size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Candidate package names, server packages first. A trailing `*` matches by prefix.
pub fn package_candidates(family: PackageFamily) -> &'static [&'static str] {
    match family {
        PackageFamily::Debian => &[
            "mysql-server",
            "mysql-server-8.0",
            "mysql-server-core-*",
            "mariadb-server",
            "mysql-client",
            "mariadb-client",
            "mysql-common",
            "mariadb-common",
        ],
        PackageFamily::RedHat => &[
            "mysql-server",
            "mysql-community-server",
            "mariadb-server",
            "mysql",
            "mariadb",
            "mysql-community-client",
            "mysql-community-common",
        ],
    }
}

/// Service units probed, in order
pub const SERVICE_CANDIDATES: &[&str] = &["mysql", "mysqld", "mariadb"];

/// Option files probed, highest priority first
pub fn config_candidates(family: PackageFamily) -> Vec<PathBuf> {
    let paths: &[&str] = match family {
        PackageFamily::Debian => &[
            "/etc/mysql/my.cnf",
            "/etc/mysql/mysql.conf.d/mysqld.cnf",
            "/etc/mysql/mariadb.conf.d/50-server.cnf",
        ],
        PackageFamily::RedHat => &[
            "/etc/my.cnf",
            "/etc/my.cnf.d/mysql-server.cnf",
            "/etc/my.cnf.d/mariadb-server.cnf",
        ],
    };
    paths.iter().map(PathBuf::from).collect()
}

/// Conventional locations used when neither the server nor its option files say otherwise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultLayout {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Log directory used when the server package is MariaDB
    pub mariadb_log_dir: PathBuf,
}

impl Default for DefaultLayout {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/mysql"),
            log_dir: PathBuf::from("/var/log/mysql"),
            mariadb_log_dir: PathBuf::from("/var/log/mariadb"),
        }
    }
}

/// Immutable record of the server's state at detection time
///
/// A snapshot is either fully "not installed" (every other field empty)
/// or built from a detected package; it cannot be mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationSnapshot {
    is_installed: bool,
    version: String,
    package_name: String,
    packages: Vec<String>,
    service_name: String,
    service_active: bool,
    service_enabled: bool,
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    binlog_dir: Option<PathBuf>,
    binlog_basename: Option<String>,
    config_files: Vec<PathBuf>,
    log_files: Vec<PathBuf>,
    data_directory_size_bytes: u64,
}

impl InstallationSnapshot {
    pub fn not_installed() -> Self {
        Self::default()
    }

    /// Start building an installed snapshot for `package_name`
    pub fn builder(package_name: impl Into<String>, version: impl Into<String>) -> SnapshotBuilder {
        let package_name = package_name.into();
        SnapshotBuilder {
            snapshot: Self {
                is_installed: true,
                version: version.into(),
                packages: vec![package_name.clone()],
                package_name,
                ..Self::default()
            },
        }
    }

    pub fn is_installed(&self) -> bool {
        self.is_installed
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Every installed candidate package, server package first
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_active(&self) -> bool {
        self.service_active
    }

    pub fn service_enabled(&self) -> bool {
        self.service_enabled
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn binlog_dir(&self) -> Option<&Path> {
        self.binlog_dir.as_deref()
    }

    /// File name prefix of the binary log series (e.g. `mysql-bin`)
    pub fn binlog_basename(&self) -> Option<&str> {
        self.binlog_basename.as_deref()
    }

    /// Option files in priority order, includes after the file that pulled them in
    pub fn config_files(&self) -> &[PathBuf] {
        &self.config_files
    }

    pub fn log_files(&self) -> &[PathBuf] {
        &self.log_files
    }

    pub fn data_directory_size_bytes(&self) -> u64 {
        self.data_directory_size_bytes
    }
}

/// Builder for installed snapshots
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    snapshot: InstallationSnapshot,
}

impl SnapshotBuilder {
    /// Additional installed package
    pub fn package(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.snapshot.packages.contains(&name) {
            self.snapshot.packages.push(name);
        }
        self
    }

    pub fn service(mut self, name: impl Into<String>, active: bool, enabled: bool) -> Self {
        self.snapshot.service_name = name.into();
        self.snapshot.service_active = active;
        self.snapshot.service_enabled = enabled;
        self
    }

    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot.data_dir = Some(path.into());
        self
    }

    pub fn log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot.log_dir = Some(path.into());
        self
    }

    pub fn binlog_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot.binlog_dir = Some(path.into());
        self
    }

    pub fn binlog_basename(mut self, basename: impl Into<String>) -> Self {
        self.snapshot.binlog_basename = Some(basename.into());
        self
    }

    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.snapshot.config_files.contains(&path) {
            self.snapshot.config_files.push(path);
        }
        self
    }

    pub fn log_files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        let set: BTreeSet<PathBuf> = self
            .snapshot
            .log_files
            .drain(..)
            .chain(files)
            .collect();
        self.snapshot.log_files = set.into_iter().collect();
        self
    }

    pub fn data_directory_size(mut self, bytes: u64) -> Self {
        self.snapshot.data_directory_size_bytes = bytes;
        self
    }

    pub fn build(self) -> InstallationSnapshot {
        self.snapshot
    }
}

/// Directory values gathered from one source
#[derive(Debug, Default)]
struct DirectoryHints {
    data_dir: Option<String>,
    log_error: Option<String>,
    log_bin: Option<String>,
}

/// Reconstructs an `InstallationSnapshot` from the host
pub struct Detector {
    family: PackageFamily,
    packages: Arc<dyn PackageManager>,
    services: Arc<dyn ServiceManager>,
    client: Option<Arc<dyn ServerClient>>,
    config_files: Vec<PathBuf>,
    defaults: DefaultLayout,
    service_candidates: Vec<String>,
    logger: Logger,
}

impl Detector {
    pub fn new(
        family: PackageFamily,
        packages: Arc<dyn PackageManager>,
        services: Arc<dyn ServiceManager>,
        logger: Logger,
    ) -> Self {
        Self {
            family,
            packages,
            services,
            client: None,
            config_files: config_candidates(family),
            defaults: DefaultLayout::default(),
            service_candidates: SERVICE_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            logger: logger.scoped("detect"),
        }
    }

    /// Query a running server for live directory values
    pub fn with_client(mut self, client: Arc<dyn ServerClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the option files probed (highest priority first)
    pub fn with_config_files(mut self, files: Vec<PathBuf>) -> Self {
        self.config_files = files;
        self
    }

    pub fn with_default_layout(mut self, defaults: DefaultLayout) -> Self {
        self.defaults = defaults;
        self
    }

    /// Probe only this service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_candidates = vec![name.into()];
        self
    }

    pub fn family(&self) -> PackageFamily {
        self.family
    }

    /// Detect the current installation
    pub fn detect(&self) -> Result<InstallationSnapshot> {
        let installed = self.packages.installed_packages()?;
        let present = self.present_candidates(&installed);

        let Some(package_name) = present
            .iter()
            .find(|p| p.contains("server"))
            .or_else(|| present.first())
            .cloned()
        else {
            self.logger.info("No database server package installed");
            return Ok(InstallationSnapshot::not_installed());
        };

        let version = self.package_version(&package_name);
        self.logger.info(format!(
            "Found {} {}",
            package_name,
            if version.is_empty() { "(unknown version)" } else { version.as_str() }
        ));

        let mut builder = InstallationSnapshot::builder(&package_name, version);
        for name in &present {
            builder = builder.package(name.clone());
        }

        if let Some((name, active, enabled)) = self.detect_service() {
            builder = builder.service(name, active, enabled);
        }

        let live = self.live_hints();
        let (config_hints, sources) = self.config_hints();
        for source in sources {
            builder = builder.config_file(source);
        }

        let data_dir = live
            .data_dir
            .or(config_hints.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.defaults.data_dir.clone());

        let log_dir = live
            .log_error
            .or(config_hints.log_error)
            .and_then(|value| log_error_dir(&value, &data_dir))
            .unwrap_or_else(|| {
                if package_name.contains("mariadb") {
                    self.defaults.mariadb_log_dir.clone()
                } else {
                    self.defaults.log_dir.clone()
                }
            });

        let (binlog_dir, binlog_basename) =
            match live.log_bin.or(config_hints.log_bin).filter(|v| !v.is_empty()) {
                Some(value) => binlog_location(&value, &data_dir),
                None => (data_dir.clone(), None),
            };

        let mut log_files = scan_log_files(&log_dir, |p| heuristics::is_log_file(p));
        log_files.extend(scan_log_files(&binlog_dir, |p| {
            heuristics::is_binlog_file(p, binlog_basename.as_deref())
        }));

        let size = if data_dir.is_dir() {
            directory_size(&data_dir).unwrap_or_else(|e| {
                self.logger
                    .warn(format!("Cannot size {}: {}", data_dir.display(), e));
                0
            })
        } else {
            0
        };

        self.logger.debug(format!(
            "Layout: data {} logs {} binlogs {}",
            data_dir.display(),
            log_dir.display(),
            binlog_dir.display()
        ));

        builder = builder
            .data_dir(data_dir)
            .log_dir(log_dir)
            .binlog_dir(binlog_dir)
            .log_files(log_files)
            .data_directory_size(size);
        if let Some(basename) = binlog_basename {
            builder = builder.binlog_basename(basename);
        }

        Ok(builder.build())
    }

    /// Installed candidates in candidate order
    fn present_candidates(&self, installed: &[String]) -> Vec<String> {
        let mut present: Vec<String> = Vec::new();
        for candidate in package_candidates(self.family) {
            let matches: Vec<&String> = match candidate.strip_suffix('*') {
                Some(prefix) => installed.iter().filter(|p| p.starts_with(prefix)).collect(),
                None => installed.iter().filter(|p| p.as_str() == *candidate).collect(),
            };
            for name in matches {
                if !present.contains(name) {
                    present.push(name.clone());
                }
            }
        }
        present
    }

    fn package_version(&self, name: &str) -> String {
        match self.packages.describe(name) {
            Ok(Some(line)) => extract_version_token(&line).unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => {
                self.logger
                    .warn(format!("Cannot read version of {}: {}", name, e));
                String::new()
            }
        }
    }

    /// First candidate unit that exists, with its active/enabled flags
    fn detect_service(&self) -> Option<(String, bool, bool)> {
        for name in &self.service_candidates {
            match self.services.exists(name) {
                Ok(true) => {
                    let active = self.services.is_active(name).unwrap_or(false);
                    let enabled = self.services.is_enabled(name).unwrap_or(false);
                    self.logger.debug(format!(
                        "Service {} (active: {}, enabled: {})",
                        name, active, enabled
                    ));
                    return Some((name.clone(), active, enabled));
                }
                Ok(false) => {}
                Err(e) => self
                    .logger
                    .warn(format!("Cannot query service {}: {}", name, e)),
            }
        }
        None
    }

    fn live_hints(&self) -> DirectoryHints {
        let Some(client) = &self.client else {
            return DirectoryHints::default();
        };
        let query = |name: &str| match client.query_variable(name) {
            Ok(value) => value,
            Err(e) => {
                self.logger.debug(format!("Live query @@{} failed: {}", name, e));
                None
            }
        };

        let data_dir = query("datadir");
        if data_dir.is_none() {
            return DirectoryHints::default();
        }
        self.logger.debug("Using live values from running server");
        DirectoryHints {
            data_dir,
            log_error: query("log_error"),
            log_bin: query("log_bin_basename"),
        }
    }

    /// Merge option files: the first file (by priority) defining a key wins
    fn config_hints(&self) -> (DirectoryHints, Vec<PathBuf>) {
        let mut hints = DirectoryHints::default();
        let mut sources = Vec::new();

        for path in &self.config_files {
            if !path.is_file() {
                continue;
            }
            let options = match cnf::load_server_options(path) {
                Ok(options) => options,
                Err(e) => {
                    self.logger.warn(format!("Skipping {}: {}", path.display(), e));
                    continue;
                }
            };
            for source in options.sources() {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }

            let value = |key: &str| options.get(key).map(str::to_string);
            if hints.data_dir.is_none() {
                hints.data_dir = value("datadir").filter(|v| !v.is_empty());
            }
            if hints.log_error.is_none() {
                hints.log_error = value("log_error").filter(|v| !v.is_empty());
            }
            if hints.log_bin.is_none() {
                hints.log_bin = value("log_bin");
            }
        }

        (hints, sources)
    }
}

/// Directory holding the error log named by a `log_error` value
///
/// `stderr` and bare names carry no directory of their own.
fn log_error_dir(value: &str, data_dir: &Path) -> Option<PathBuf> {
    if value.eq_ignore_ascii_case("stderr") {
        return None;
    }
    let path = Path::new(value);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    };
    path.parent().map(Path::to_path_buf)
}

/// Binlog directory and series basename for a `log_bin` value
fn binlog_location(value: &str, data_dir: &Path) -> (PathBuf, Option<String>) {
    let path = Path::new(value);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    };
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.strip_suffix(".index").unwrap_or(n).to_string());
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.to_path_buf());
    (dir, basename)
}

/// Files directly inside `dir` accepted by `predicate`, sorted
fn scan_log_files(dir: &Path, predicate: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .map(|e| e.path())
        .filter(|p| predicate(p))
        .collect();
    files.sort();
    files
}
