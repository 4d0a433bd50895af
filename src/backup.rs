// src/backup.rs

//! Pre-operation backups
//!
//! A backup is a timestamped directory under the backup root:
//!
//! ```text
//! <root>/sqlwarden-backup-20260118-093012/
//!   data.tar.gz      data directory, rooted at its file name
//!   config/          copies of every detected option file
//!   manifest.json    what was saved, from where, with the archive checksum
//! ```
//!
//! The engine assumes the service is already stopped; the pipeline
//! orders its steps that way.

use crate::context::OperationContext;
use crate::detect::InstallationSnapshot;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::system::Filesystem;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Prefix of backup directory names
pub const BACKUP_PREFIX: &str = "sqlwarden-backup-";

pub const ARCHIVE_NAME: &str = "data.tar.gz";
pub const CONFIG_DIR: &str = "config";
pub const MANIFEST_NAME: &str = "manifest.json";

/// One saved option file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConfig {
    pub source: PathBuf,
    /// Path relative to the backup directory
    pub stored_as: PathBuf,
}

/// `manifest.json` of a backup directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: DateTime<Utc>,
    pub package_name: String,
    pub version: String,
    pub data_dir: Option<PathBuf>,
    pub archive: Option<String>,
    pub archive_size: u64,
    pub archive_sha256: Option<String>,
    pub config_files: Vec<SavedConfig>,
}

impl BackupManifest {
    pub fn load(backup_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(backup_path.join(MANIFEST_NAME))
            .map_err(|e| Error::Backup(format!("cannot read manifest in {}: {}", backup_path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Result of a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub path: PathBuf,
    /// `None` when there was no data directory to archive
    pub archive_path: Option<PathBuf>,
    pub archive_size: u64,
    pub config_files: Vec<SavedConfig>,
}

/// Creates and restores backups
pub struct BackupEngine {
    filesystem: Arc<dyn Filesystem>,
    logger: Logger,
}

impl BackupEngine {
    pub fn new(filesystem: Arc<dyn Filesystem>, logger: Logger) -> Self {
        Self {
            filesystem,
            logger: logger.scoped("backup"),
        }
    }

    /// Back up the data directory and option files of `snapshot` under `root`
    pub fn backup(&self, ctx: &OperationContext, snapshot: &InstallationSnapshot, root: &Path) -> Result<BackupOutcome> {
        if !snapshot.is_installed() {
            return Err(Error::Backup("no installation to back up".to_string()));
        }

        let now = Utc::now();
        let path = create_backup_dir(root, &now)?;
        self.logger.info(format!("Creating backup in {}", path.display()));

        let mut archive_path = None;
        let mut archive_size = 0;
        let mut archive_sha256 = None;

        match snapshot.data_dir() {
            Some(data_dir) if data_dir.is_dir() => {
                let target = path.join(ARCHIVE_NAME);
                ctx.report_message(&format!("Archiving {}", data_dir.display()));
                archive_directory(ctx, data_dir, &target, &self.logger)?;
                archive_size = fs::metadata(&target)?.len();
                archive_sha256 = Some(sha256_file(&target)?);
                self.logger.info(format!(
                    "Archived {} ({} bytes compressed)",
                    data_dir.display(),
                    archive_size
                ));
                archive_path = Some(target);
            }
            Some(data_dir) => self.logger.warn(format!(
                "Data directory {} not found; backing up configuration only",
                data_dir.display()
            )),
            None => self.logger.warn("No data directory detected; backing up configuration only"),
        }

        let config_files = self.save_config_files(ctx, snapshot.config_files(), &path)?;

        let manifest = BackupManifest {
            created_at: now,
            package_name: snapshot.package_name().to_string(),
            version: snapshot.version().to_string(),
            data_dir: snapshot.data_dir().map(Path::to_path_buf),
            archive: archive_path.as_ref().map(|_| ARCHIVE_NAME.to_string()),
            archive_size,
            archive_sha256,
            config_files: config_files.clone(),
        };
        fs::write(path.join(MANIFEST_NAME), serde_json::to_string_pretty(&manifest)?)?;

        Ok(BackupOutcome {
            path,
            archive_path,
            archive_size,
            config_files,
        })
    }

    fn save_config_files(&self, ctx: &OperationContext, files: &[PathBuf], backup: &Path) -> Result<Vec<SavedConfig>> {
        let config_dir = backup.join(CONFIG_DIR);
        fs::create_dir_all(&config_dir)?;

        let mut saved: Vec<SavedConfig> = Vec::new();
        for source in files {
            ctx.check_cancelled("config backup")?;
            if !self.filesystem.exists(source) {
                self.logger
                    .warn(format!("Config file {} vanished; skipping", source.display()));
                continue;
            }

            let name = stored_name(source, saved.iter().map(|s| s.stored_as.as_path()));
            let stored_as = Path::new(CONFIG_DIR).join(&name);
            self.filesystem.create_backup(source, &backup.join(&stored_as))?;
            self.logger
                .debug(format!("Saved {} as {}", source.display(), stored_as.display()));
            saved.push(SavedConfig {
                source: source.clone(),
                stored_as,
            });
        }
        Ok(saved)
    }

    /// Unpack the data archive of `backup_path` into `data_dir`
    ///
    /// Existing files are overwritten; the archive's top-level directory is
    /// mapped onto `data_dir`.
    pub fn restore_data(&self, backup_path: &Path, data_dir: &Path) -> Result<()> {
        let archive_path = backup_path.join(ARCHIVE_NAME);
        let file = File::open(&archive_path)
            .map_err(|e| Error::Backup(format!("cannot open {}: {}", archive_path.display(), e)))?;

        self.logger.info(format!(
            "Restoring {} into {}",
            archive_path.display(),
            data_dir.display()
        ));
        fs::create_dir_all(data_dir)?;

        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        archive.set_preserve_permissions(true);
        archive.set_overwrite(true);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let mut components = path.components();
            components.next();
            let relative: PathBuf = components.collect();

            if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(Error::Backup(format!("unsafe archive path {}", path.display())));
            }
            let target = data_dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
        }
        Ok(())
    }

    /// Copy every saved option file back to where it came from
    pub fn restore_config_files(&self, backup_path: &Path) -> Result<usize> {
        let manifest = BackupManifest::load(backup_path)?;
        for saved in &manifest.config_files {
            if let Some(parent) = saved.source.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(backup_path.join(&saved.stored_as), &saved.source)?;
            self.logger.info(format!("Restored {}", saved.source.display()));
        }
        Ok(manifest.config_files.len())
    }
}

/// `<root>/sqlwarden-backup-<YYYYmmdd-HHMMSS>`, suffixed `-N` when taken
fn create_backup_dir(root: &Path, now: &DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(root)
        .map_err(|e| Error::Backup(format!("cannot create backup root {}: {}", root.display(), e)))?;

    let base = format!("{}{}", BACKUP_PREFIX, now.format("%Y%m%d-%H%M%S"));
    for attempt in 0..100 {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}-{}", base, attempt)
        };
        let path = root.join(name);
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Backup(format!("too many backups named {} in {}", base, root.display())))
}

/// File name for a saved option file; on collision, prefix the parent directory name
fn stored_name<'a>(source: &Path, taken: impl Iterator<Item = &'a Path> + Clone) -> String {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let is_taken = |name: &str| taken.clone().any(|t| t.file_name().is_some_and(|n| n == name));

    if !is_taken(&file_name) {
        return file_name;
    }
    let parent = source
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = format!("{}_{}", parent, file_name);
    let mut n = 1;
    while is_taken(&candidate) {
        candidate = format!("{}_{}.{}", parent, file_name, n);
        n += 1;
    }
    candidate
}

/// tar + gzip `dir` into `target`, rooted at the directory's file name
///
/// Symlinks are stored as links. Special files are skipped.
fn archive_directory(ctx: &OperationContext, dir: &Path, target: &Path, logger: &Logger) -> Result<()> {
    let root_name = dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));

    let output = File::create(target)?;
    let encoder = GzEncoder::new(output, Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(false);

    for entry in WalkDir::new(dir).follow_links(false) {
        ctx.check_cancelled("backup archive")?;
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| Error::Backup(format!("{} escaped {}", entry.path().display(), dir.display())))?;
        let name = root_name.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() || file_type.is_file() || file_type.is_symlink() {
            archive.append_path_with_name(entry.path(), &name)?;
        } else {
            logger.warn(format!("Not archiving special file {}", entry.path().display()));
        }
    }

    let encoder = archive.into_inner()?;
    encoder.finish()?;
    Ok(())
}

/// Hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
