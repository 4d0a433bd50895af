// src/config.rs

//! Operation configuration
//!
//! Loaded from TOML (`/etc/sqlwarden/sqlwarden.toml` by default). A
//! missing file means all defaults; CLI flags are applied on top by the
//! binary. Each operation reads a typed view (`RemoveOptions`,
//! `UpgradeOptions`, `ConfigureOptions`) rather than the raw sections.
//!
//! ```toml
//! force = false
//! assume_yes = false
//!
//! [server]
//! family = "auto"          # auto | debian | redhat
//! service_name = "mysql"
//!
//! [layout]
//! data_dir = "/data/mysql"
//!
//! [backup]
//! enabled = true
//! root = "/var/backups/sqlwarden"
//! ```

use crate::error::{Error, Result};
use crate::migration::DesiredLayout;
use crate::system::PackageFamily;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sqlwarden/sqlwarden.toml";

/// Default backup root
pub const DEFAULT_BACKUP_ROOT: &str = "/var/backups/sqlwarden";

/// Packaging family selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilySetting {
    /// Read `/etc/os-release`
    #[default]
    Auto,
    Debian,
    Redhat,
}

impl FamilySetting {
    /// The fixed family, or `None` for auto-detection
    pub fn fixed(self) -> Option<PackageFamily> {
        match self {
            Self::Auto => None,
            Self::Debian => Some(PackageFamily::Debian),
            Self::Redhat => Some(PackageFamily::RedHat),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub family: FamilySetting,
    /// Probe only this service unit
    #[serde(default)]
    pub service_name: Option<String>,
    /// Primary option file, probed before the family's defaults
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

/// Desired directory layout for `configure`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSection {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub binlog_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_backup_root")]
    pub root: PathBuf,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_backup_root(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSection {
    #[serde(default)]
    pub purge_data: bool,
    #[serde(default)]
    pub purge_config: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSection {
    /// Packages to upgrade; empty means every detected package
    #[serde(default)]
    pub target_packages: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_backup_root() -> PathBuf {
    PathBuf::from(DEFAULT_BACKUP_ROOT)
}

/// Complete configuration for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub layout: LayoutSection,
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub remove: RemoveSection,
    #[serde(default)]
    pub upgrade: UpgradeSection,
    /// Skip the data directory artifact check (never the protected path list)
    #[serde(default)]
    pub force: bool,
    /// Do not prompt for confirmation
    #[serde(default)]
    pub assume_yes: bool,
}

impl OperationConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let layout = [
            ("layout.data_dir", &self.layout.data_dir),
            ("layout.log_dir", &self.layout.log_dir),
            ("layout.binlog_dir", &self.layout.binlog_dir),
        ];
        for (key, value) in layout {
            if let Some(path) = value {
                if !path.is_absolute() {
                    return Err(Error::Config(format!(
                        "{} must be an absolute path, got {}",
                        key,
                        path.display()
                    )));
                }
            }
        }
        if self.backup.enabled && self.backup.root.as_os_str().is_empty() {
            return Err(Error::Config("backup.root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Backup root when backups are enabled
    pub fn backup_root(&self) -> Option<&Path> {
        self.backup.enabled.then_some(self.backup.root.as_path())
    }

    pub fn desired_layout(&self) -> DesiredLayout {
        DesiredLayout {
            data_dir: self.layout.data_dir.clone(),
            log_dir: self.layout.log_dir.clone(),
            binlog_dir: self.layout.binlog_dir.clone(),
        }
    }

    pub fn remove_options(&self) -> RemoveOptions {
        RemoveOptions {
            purge_data: self.remove.purge_data,
            purge_config: self.remove.purge_config,
            backup_root: self.backup_root().map(Path::to_path_buf),
            force: self.force,
            assume_yes: self.assume_yes,
        }
    }

    pub fn upgrade_options(&self) -> UpgradeOptions {
        UpgradeOptions {
            target_packages: self.upgrade.target_packages.clone(),
            backup_root: self.backup_root().map(Path::to_path_buf),
            assume_yes: self.assume_yes,
        }
    }

    pub fn configure_options(&self) -> ConfigureOptions {
        ConfigureOptions {
            layout: self.desired_layout(),
            backup_root: self.backup_root().map(Path::to_path_buf),
            force: self.force,
            assume_yes: self.assume_yes,
        }
    }
}

/// Parameters of `remove`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub purge_data: bool,
    pub purge_config: bool,
    /// `None` disables the backup step
    pub backup_root: Option<PathBuf>,
    pub force: bool,
    pub assume_yes: bool,
}

/// Parameters of `upgrade`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub target_packages: Vec<String>,
    pub backup_root: Option<PathBuf>,
    pub assume_yes: bool,
}

/// Parameters of `configure`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureOptions {
    pub layout: DesiredLayout,
    pub backup_root: Option<PathBuf>,
    pub force: bool,
    pub assume_yes: bool,
}
