// src/safety.rs

//! Safety validation for destructive filesystem operations
//!
//! Every removal goes through `SafetyValidator`. Decisions are made on the
//! resolved absolute path: relative segments are cleaned lexically and
//! symlinks in the existing part of the path are resolved, so neither
//! `/var/lib/mysql/../..` nor a symlink pointing at `/etc` can slip
//! through.
//!
//! The root-level deny-list is never bypassed. The `force` flag only skips
//! the check that a data directory contains recognizable server artifacts.

use crate::error::{Error, Result};
use crate::heuristics;
use crate::logging::Logger;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// System directories that may never be removed, nor any of their direct
/// children (unless the parent is in `ALLOWED_PARENTS`).
pub const PROTECTED_PATHS: &[&str] = &[
    "/",
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/home",
    "/lib",
    "/lib32",
    "/lib64",
    "/media",
    "/mnt",
    "/opt",
    "/proc",
    "/root",
    "/run",
    "/sbin",
    "/srv",
    "/sys",
    "/tmp",
    "/usr",
    "/var",
    "/usr/bin",
    "/usr/lib",
    "/usr/lib64",
    "/usr/local",
    "/usr/local/bin",
    "/usr/local/lib",
    "/usr/local/sbin",
    "/usr/sbin",
    "/usr/share",
    "/var/cache",
    "/var/lib",
    "/var/log",
    "/var/run",
    "/var/spool",
];

/// Parents whose direct children are known data/log locations
pub const ALLOWED_PARENTS: &[&str] = &["/var/lib", "/var/log", "/opt", "/usr/local"];

/// Lexically normalize an absolute path: drop `.`, apply `..`, never climb above `/`
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(c) => cleaned.push(c),
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    cleaned
}

/// Why `resolved` is protected, if it is
pub fn protection_reason(resolved: &Path) -> Option<String> {
    let is_listed = |p: &Path| PROTECTED_PATHS.iter().any(|d| Path::new(d) == p);

    if is_listed(resolved) {
        return Some("system directory".to_string());
    }

    let parent = resolved.parent()?;
    if is_listed(parent) && !ALLOWED_PARENTS.iter().any(|a| Path::new(a) == parent) {
        return Some(format!("direct child of system directory {}", parent.display()));
    }

    None
}

/// Validator for removal targets
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    logger: Logger,
    force: bool,
    base_dir: Option<PathBuf>,
}

impl SafetyValidator {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.scoped("safety"),
            force: false,
            base_dir: None,
        }
    }

    /// Skip the server-artifact check for data directories
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Base directory for relative paths (defaults to the process cwd)
    pub fn with_base_dir(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base.into());
        self
    }

    pub fn is_force(&self) -> bool {
        self.force
    }

    /// Resolve `path` to a clean absolute path with symlinks resolved
    ///
    /// The longest existing prefix is canonicalized and the remaining
    /// (not yet existing) components are appended, so destinations that
    /// will only be created later can be validated too.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(Error::Validation("empty path".to_string()));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let base = match &self.base_dir {
                Some(base) => base.clone(),
                None => std::env::current_dir()?,
            };
            base.join(path)
        };
        let cleaned = clean_path(&absolute);

        let mut existing = cleaned.as_path();
        let mut remainder = Vec::new();
        loop {
            if fs::symlink_metadata(existing).is_ok() {
                break;
            }
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    remainder.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }

        let mut resolved = match fs::canonicalize(existing) {
            Ok(canonical) => canonical,
            Err(_) => existing.to_path_buf(),
        };
        for name in remainder.iter().rev() {
            resolved.push(name);
        }

        Ok(clean_path(&resolved))
    }

    /// Refuse protected paths; returns the resolved path on success
    ///
    /// Both the lexically cleaned path and the symlink-resolved path must
    /// pass.
    pub fn validate_removal_target(&self, path: &Path) -> Result<PathBuf> {
        let resolved = self.resolve(path)?;

        let lexical = if path.is_absolute() {
            clean_path(path)
        } else {
            resolved.clone()
        };

        for candidate in [&lexical, &resolved] {
            if let Some(reason) = protection_reason(candidate) {
                self.logger.warn(format!(
                    "Refusing removal of {} (resolved {}): {}",
                    path.display(),
                    candidate.display(),
                    reason
                ));
                return Err(Error::protected(candidate.clone(), reason));
            }
        }

        self.logger
            .debug(format!("Removal target {} resolved to {}", path.display(), resolved.display()));
        Ok(resolved)
    }

    /// Validate a data directory before destroying it
    ///
    /// On top of `validate_removal_target`, the directory must exist and
    /// contain recognizable server artifacts (unless forced).
    pub fn validate_data_directory(&self, path: &Path) -> Result<PathBuf> {
        let resolved = self.validate_removal_target(path)?;

        let metadata = fs::metadata(&resolved).map_err(|_| {
            Error::Validation(format!("data directory {} does not exist", resolved.display()))
        })?;
        if !metadata.is_dir() {
            return Err(Error::Validation(format!(
                "data directory {} is not a directory",
                resolved.display()
            )));
        }

        if !heuristics::has_server_artifacts(&resolved) {
            if self.force {
                self.logger.warn(format!(
                    "{} has no server artifacts; continuing because force is set",
                    resolved.display()
                ));
            } else {
                return Err(Error::Validation(format!(
                    "{} does not look like a database data directory (none of {} found)",
                    resolved.display(),
                    heuristics::SERVER_ARTIFACTS.join(", ")
                )));
            }
        }

        Ok(resolved)
    }
}
