// src/migration/mod.rs

//! Directory migration
//!
//! Relocates the data, error log and binary log directories while the
//! service is offline. A batch of `MigrationTask`s is planned by diffing
//! the detected layout against the desired one, then executed by
//! `DirectoryMigrator::perform_migration`:
//!
//! - data: full tree copy, critical file verification, source removal
//! - logs/binlogs: only matching files are copied (never descending into
//!   schema directories), then the copied source files are removed
//!
//! The data task is critical: its failure aborts the batch and reverts
//! what the batch already did. Log task failures become warnings.

mod copy;
mod engine;

pub use copy::{CopyStats, DirectoryMigrator};
pub use engine::{MigrationReport, TaskOutcome};

use crate::detect::InstallationSnapshot;
use crate::safety::clean_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which directory a task relocates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    Data,
    Logs,
    Binlogs,
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Logs => write!(f, "logs"),
            Self::Binlogs => write!(f, "binlogs"),
        }
    }
}

/// One directory relocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub kind: MigrationKind,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Only the data directory is critical
    pub critical: bool,
}

impl MigrationTask {
    /// `None` when source and destination are the same directory
    pub fn new(kind: MigrationKind, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Option<Self> {
        let source = source.into();
        let destination = destination.into();
        if same_directory(&source, &destination) {
            return None;
        }
        Some(Self {
            kind,
            source,
            destination,
            critical: kind == MigrationKind::Data,
        })
    }
}

impl fmt::Display for MigrationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.kind,
            self.source.display(),
            self.destination.display()
        )
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    if a.is_absolute() && b.is_absolute() {
        clean_path(a) == clean_path(b)
    } else {
        a == b
    }
}

/// Directories the operator wants; `None` keeps the current location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLayout {
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub binlog_dir: Option<PathBuf>,
}

impl DesiredLayout {
    pub fn is_empty(&self) -> bool {
        self.data_dir.is_none() && self.log_dir.is_none() && self.binlog_dir.is_none()
    }
}

/// Diff the detected layout against `desired`
///
/// Log and binlog tasks come before the data task, so files living inside
/// the data directory are relocated before the data tree itself moves.
pub fn plan_migrations(snapshot: &InstallationSnapshot, desired: &DesiredLayout) -> Vec<MigrationTask> {
    if !snapshot.is_installed() {
        return Vec::new();
    }

    let pairs = [
        (MigrationKind::Logs, snapshot.log_dir(), desired.log_dir.as_deref()),
        (MigrationKind::Binlogs, snapshot.binlog_dir(), desired.binlog_dir.as_deref()),
        (MigrationKind::Data, snapshot.data_dir(), desired.data_dir.as_deref()),
    ];

    pairs
        .into_iter()
        .filter_map(|(kind, current, wanted)| match (current, wanted) {
            (Some(current), Some(wanted)) => MigrationTask::new(kind, current, wanted),
            _ => None,
        })
        .collect()
}
