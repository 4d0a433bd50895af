// src/lib.rs

//! sqlwarden: lifecycle manager for MySQL/MariaDB servers
//!
//! Destructive operations (remove, upgrade, relocate directories) run as
//! staged pipelines with compensating rollback.
//!
//! # Architecture
//!
//! - `detect`: reconstructs the installed server's state as an immutable snapshot
//! - `safety`: refuses removals of protected system paths
//! - `migration`: type-aware directory relocation with verification
//! - `backup`: timestamped data archive plus option file copies
//! - `pipeline`: ordered steps, reverse-order rollback on failure
//! - `operations`: remove/upgrade/configure assembled from steps
//! - `system`: package manager, service manager and filesystem collaborators

pub mod backup;
pub mod config;
pub mod context;
pub mod detect;
mod error;
pub mod heuristics;
pub mod logging;
pub mod migration;
pub mod operations;
pub mod pipeline;
pub mod progress;
pub mod safety;
pub mod system;

pub use backup::{BackupEngine, BackupManifest, BackupOutcome};
pub use config::{ConfigureOptions, OperationConfig, RemoveOptions, UpgradeOptions};
pub use context::OperationContext;
pub use detect::{Detector, InstallationSnapshot};
pub use error::{Error, Result};
pub use logging::{CaptureSink, Level, LogRecord, LogSink, Logger};
pub use migration::{DesiredLayout, DirectoryMigrator, MigrationKind, MigrationReport, MigrationTask, plan_migrations};
pub use operations::{Host, OperationResult, RollbackInfo, run_configure, run_remove, run_upgrade};
pub use pipeline::{Pipeline, PipelineFailure, PipelineReport, PipelineState, PipelineStatus, RollbackData, Step};
pub use progress::{LogProgress, ProgressTracker};
pub use safety::SafetyValidator;
