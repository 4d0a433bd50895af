// src/system/filesystem.rs

//! Filesystem capability

use crate::context::OperationContext;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::migration::DirectoryMigrator;
use crate::safety::SafetyValidator;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Filesystem operations used by the lifecycle core
pub trait Filesystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Remove a file, symlink or directory tree after `validator` approves it.
    /// Removing something that does not exist succeeds.
    fn safe_remove(&self, path: &Path, validator: &SafetyValidator) -> Result<()>;

    /// Copy a file or directory tree from `src` to `dst`
    fn create_backup(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Total size in bytes of regular files under `path`
    fn calculate_size(&self, path: &Path) -> Result<u64>;
}

/// Sum regular file sizes under `path`; symlinks and special files are not counted
pub fn directory_size(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// The real host filesystem
#[derive(Debug, Clone)]
pub struct HostFilesystem {
    logger: Logger,
}

impl HostFilesystem {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.scoped("filesystem"),
        }
    }
}

impl Filesystem for HostFilesystem {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn safe_remove(&self, path: &Path, validator: &SafetyValidator) -> Result<()> {
        let resolved = validator.validate_removal_target(path)?;

        // Remove what the path points at, then any link that led there
        let removed_target = remove_entry(&resolved)?;
        let removed_link = match fs::symlink_metadata(path) {
            Ok(m) if m.file_type().is_symlink() => {
                fs::remove_file(path)?;
                true
            }
            Ok(_) | Err(_) => false,
        };

        if removed_target || removed_link {
            if resolved.as_path() == path {
                self.logger.info(format!("Removed {}", path.display()));
            } else {
                self.logger
                    .info(format!("Removed {} (resolved {})", path.display(), resolved.display()));
            }
        } else {
            self.logger.debug(format!("{} already absent", path.display()));
        }
        Ok(())
    }

    fn create_backup(&self, src: &Path, dst: &Path) -> Result<()> {
        let metadata = fs::symlink_metadata(src)
            .map_err(|e| Error::Backup(format!("cannot read {}: {}", src.display(), e)))?;

        if metadata.is_dir() {
            let migrator = DirectoryMigrator::new(
                SafetyValidator::new(self.logger.clone()),
                self.logger.clone(),
            );
            migrator.copy_tree(&OperationContext::new(self.logger.clone()), src, dst)?;
            return Ok(());
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(src)?;
            std::os::unix::fs::symlink(target, dst)?;
        } else {
            fs::copy(src, dst)?;
        }
        self.logger
            .debug(format!("Copied {} to {}", src.display(), dst.display()));
        Ok(())
    }

    fn calculate_size(&self, path: &Path) -> Result<u64> {
        directory_size(path)
    }
}

/// Remove a file or directory tree without following a final symlink;
/// `false` when nothing was there
fn remove_entry(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostFilesystem {
        HostFilesystem::new(Logger::tracing())
    }

    #[test]
    fn test_directory_size_ignores_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("data");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a"), vec![0u8; 100]).unwrap();
        fs::write(root.join("sub/b"), vec![0u8; 50]).unwrap();
        std::os::unix::fs::symlink(root.join("a"), root.join("link")).unwrap();

        assert_eq!(directory_size(&root).unwrap(), 150);
        assert_eq!(host().calculate_size(&root).unwrap(), 150);
    }

    #[test]
    fn test_safe_remove_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("old-data");
        fs::create_dir_all(target.join("mysql")).unwrap();

        let validator = SafetyValidator::new(Logger::tracing());
        host().safe_remove(&target, &validator).unwrap();
        assert!(!target.exists());
        host().safe_remove(&target, &validator).unwrap();
    }

    #[test]
    fn test_safe_remove_follows_symlinked_directory() {
        let temp = tempfile::tempdir().unwrap();
        let real = temp.path().join("srv/mysqldata");
        fs::create_dir_all(real.join("mysql")).unwrap();
        fs::write(real.join("ibdata1"), b"ibdata").unwrap();
        let link = temp.path().join("lib/mysql");
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let validator = SafetyValidator::new(Logger::tracing());
        host().safe_remove(&link, &validator).unwrap();
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(!real.exists());
    }

    #[test]
    fn test_safe_remove_refuses_protected() {
        let validator = SafetyValidator::new(Logger::tracing());
        let err = host().safe_remove(Path::new("/etc"), &validator).unwrap_err();
        assert!(err.is_protected_path());
    }

    #[test]
    fn test_create_backup_file() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("my.cnf");
        fs::write(&src, "[mysqld]\n").unwrap();
        let dst = temp.path().join("backup/config/my.cnf");

        host().create_backup(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst).unwrap(), "[mysqld]\n");
    }
}
