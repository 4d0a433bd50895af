// src/migration/copy.rs

//! Type-aware tree copying

use crate::context::OperationContext;
use crate::error::{Error, Result};
use crate::heuristics;
use crate::logging::Logger;
use crate::progress::{LogProgress, ProgressTracker};
use crate::safety::SafetyValidator;
use crate::system::directory_size;
use std::fs::{self, File, Metadata};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, chown, lchown, symlink};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// What a tree copy did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    /// Sockets, devices and FIFOs left behind
    pub skipped_special: u64,
    pub bytes: u64,
    /// Entries whose owner/group could not be preserved
    pub ownership_failures: u64,
}

/// Copies, verifies and relocates server directories
#[derive(Debug, Clone)]
pub struct DirectoryMigrator {
    pub(super) validator: SafetyValidator,
    pub(super) logger: Logger,
}

impl DirectoryMigrator {
    pub fn new(validator: SafetyValidator, logger: Logger) -> Self {
        Self {
            validator,
            logger: logger.scoped("migration"),
        }
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    /// Copy the tree at `source` into `destination`
    ///
    /// Directories keep their mode and (best-effort) owner. Symlinks are
    /// recreated with the same target string. Regular files are streamed.
    /// Special files are skipped with a warning. Any file copy failure
    /// aborts the copy.
    pub fn copy_tree(&self, ctx: &OperationContext, source: &Path, destination: &Path) -> Result<CopyStats> {
        let root = fs::symlink_metadata(source)?;
        if !root.is_dir() {
            return Err(Error::Migration {
                kind: "tree".to_string(),
                message: format!("{} is not a directory", source.display()),
            });
        }

        let total = directory_size(source).unwrap_or(0);
        let milestones = LogProgress::new(format!("Copy {}", source.display()), total, self.logger.clone());
        if let Some(progress) = ctx.progress() {
            progress.set_length(total);
        }
        ctx.report_message(&format!("Copying {}", source.display()));
        self.logger.info(format!(
            "Copying {} to {} ({} bytes)",
            source.display(),
            destination.display(),
            total
        ));

        fs::create_dir_all(destination)?;

        let mut stats = CopyStats::default();
        // Directory modes are applied last so read-only directories can still be filled
        let mut directories: Vec<(PathBuf, Metadata)> = Vec::new();

        for entry in WalkDir::new(source).follow_links(false) {
            ctx.check_cancelled("directory copy")?;
            let entry = entry?;
            let relative = entry.path().strip_prefix(source).map_err(|_| Error::Migration {
                kind: "tree".to_string(),
                message: format!("{} escaped {}", entry.path().display(), source.display()),
            })?;
            let target = destination.join(relative);
            let file_type = entry.file_type();
            let metadata = fs::symlink_metadata(entry.path())?;

            if file_type.is_dir() {
                fs::create_dir_all(&target)?;
                directories.push((target, metadata));
                stats.directories += 1;
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path())?;
                if fs::symlink_metadata(&target).is_ok() {
                    fs::remove_file(&target)?;
                }
                symlink(&link, &target)?;
                if !self.preserve_owner(&target, &metadata, true) {
                    stats.ownership_failures += 1;
                }
                stats.symlinks += 1;
            } else if file_type.is_file() {
                let bytes = self.copy_file(ctx, entry.path(), &target, &metadata, &milestones)?;
                if !self.preserve_owner(&target, &metadata, false) {
                    stats.ownership_failures += 1;
                }
                stats.files += 1;
                stats.bytes += bytes;
            } else {
                self.logger
                    .warn(format!("Skipping special file {}", entry.path().display()));
                stats.skipped_special += 1;
            }
        }

        for (path, metadata) in directories.iter().rev() {
            fs::set_permissions(path, metadata.permissions())?;
            if !self.preserve_owner(path, metadata, false) {
                stats.ownership_failures += 1;
            }
        }

        if stats.ownership_failures > 0 {
            self.logger.warn(format!(
                "Could not preserve ownership of {} entries under {}",
                stats.ownership_failures,
                destination.display()
            ));
        }
        self.logger.info(format!(
            "Copied {} files, {} directories, {} symlinks ({} bytes)",
            stats.files, stats.directories, stats.symlinks, stats.bytes
        ));
        Ok(stats)
    }

    /// Copy only files accepted by `predicate`, without descending into data directories
    ///
    /// Returns the copied paths relative to `source`.
    pub fn copy_matching_files(
        &self,
        ctx: &OperationContext,
        source: &Path,
        destination: &Path,
        predicate: &dyn Fn(&Path) -> bool,
    ) -> Result<Vec<PathBuf>> {
        let mut copied = Vec::new();
        self.copy_matching_into(ctx, source, destination, predicate, &mut copied)?;
        Ok(copied)
    }

    /// `copy_matching_files`, recording progress in `copied` even on failure
    pub(super) fn copy_matching_into(
        &self,
        ctx: &OperationContext,
        source: &Path,
        destination: &Path,
        predicate: &dyn Fn(&Path) -> bool,
        copied: &mut Vec<PathBuf>,
    ) -> Result<()> {
        if !fs::symlink_metadata(source)?.is_dir() {
            return Err(Error::Migration {
                kind: "logs".to_string(),
                message: format!("{} is not a directory", source.display()),
            });
        }
        fs::create_dir_all(destination)?;

        let milestones = LogProgress::new(format!("Copy logs from {}", source.display()), 0, self.logger.clone());
        let walker = WalkDir::new(source)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !(e.file_type().is_dir() && heuristics::is_data_directory(e.path()))
            });
        let mut ownership_failures = 0u64;

        for entry in walker {
            ctx.check_cancelled("log copy")?;
            let entry = entry?;
            if !entry.file_type().is_file() || !predicate(entry.path()) {
                continue;
            }

            let relative = match entry.path().strip_prefix(source) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            let target = destination.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let metadata = fs::symlink_metadata(entry.path())?;
            self.copy_file(ctx, entry.path(), &target, &metadata, &milestones)?;
            if !self.preserve_owner(&target, &metadata, false) {
                ownership_failures += 1;
            }
            copied.push(relative);
        }

        if ownership_failures > 0 {
            self.logger.warn(format!(
                "Could not preserve ownership of {} files under {}",
                ownership_failures,
                destination.display()
            ));
        }

        self.logger.info(format!(
            "Copied {} matching files from {} to {}",
            copied.len(),
            source.display(),
            destination.display()
        ));
        Ok(())
    }

    /// Every critical artifact present in `source` must exist in `destination`
    pub fn verify_critical_files(&self, source: &Path, destination: &Path) -> Result<()> {
        let missing: Vec<&str> = heuristics::CRITICAL_FILES
            .iter()
            .copied()
            .filter(|name| fs::symlink_metadata(source.join(name)).is_ok())
            .filter(|name| fs::symlink_metadata(destination.join(name)).is_err())
            .collect();

        if missing.is_empty() {
            self.logger
                .debug(format!("Critical files verified in {}", destination.display()));
            Ok(())
        } else {
            Err(Error::Migration {
                kind: "data".to_string(),
                message: format!(
                    "critical files missing in {}: {}",
                    destination.display(),
                    missing.join(", ")
                ),
            })
        }
    }

    /// Stream one regular file and apply its mode; returns bytes written
    fn copy_file(
        &self,
        ctx: &OperationContext,
        source: &Path,
        target: &Path,
        metadata: &Metadata,
        milestones: &LogProgress,
    ) -> Result<u64> {
        let mut reader = File::open(source)?;
        let mut writer = File::create(target)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            written += n as u64;
            milestones.increment(n as u64);
            if let Some(progress) = ctx.progress() {
                progress.increment(n as u64);
            }
            ctx.check_cancelled("file copy")?;
        }
        writer.flush()?;
        drop(writer);

        fs::set_permissions(target, metadata.permissions())?;
        Ok(written)
    }

    /// Best-effort owner/group preservation; false when it failed
    fn preserve_owner(&self, target: &Path, metadata: &Metadata, is_link: bool) -> bool {
        let (uid, gid) = (Some(metadata.uid()), Some(metadata.gid()));
        let result = if is_link {
            lchown(target, uid, gid)
        } else {
            chown(target, uid, gid)
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.logger.debug(format!(
                    "Cannot set owner {}:{} on {}: {}",
                    metadata.uid(),
                    metadata.gid(),
                    target.display(),
                    e
                ));
                false
            }
        }
    }
}
