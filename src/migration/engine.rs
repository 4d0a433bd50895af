// src/migration/engine.rs

//! Batch execution and compensation

use super::{DirectoryMigrator, MigrationKind, MigrationTask};
use crate::context::OperationContext;
use crate::error::{Error, Result};
use crate::heuristics;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What one completed task changed, enough to undo it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task: MigrationTask,
    /// The destination directory did not exist before the task
    pub created_destination: bool,
    /// The source tree (data) or the copied source files (logs) were removed
    pub removed_source: bool,
    /// Files copied by a log/binlog task, relative to source and destination
    pub moved_files: Vec<PathBuf>,
    /// Copying had begun when the task ended
    pub copy_started: bool,
}

/// Result of a migration batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub outcomes: Vec<TaskOutcome>,
    /// Non-critical task failures
    pub warnings: Vec<String>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl DirectoryMigrator {
    /// Execute a migration batch in order
    ///
    /// Non-critical failures are cleaned up, logged and recorded as
    /// warnings. A critical failure (or cancellation) cleans up the failed
    /// task, reverts every task already completed in this batch and
    /// returns the error.
    pub fn perform_migration(&self, ctx: &OperationContext, tasks: &[MigrationTask]) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        for task in tasks {
            self.logger.info(format!("Migrating {}", task));
            let mut outcome = TaskOutcome {
                task: task.clone(),
                created_destination: false,
                removed_source: false,
                moved_files: Vec::new(),
                copy_started: false,
            };

            let result = ctx
                .check_cancelled("migration")
                .and_then(|()| self.migrate_task(ctx, task, &mut outcome));

            match result {
                Ok(()) => report.outcomes.push(outcome),
                Err(e) if task.critical || e.is_cancelled() => {
                    self.logger.error(format!("Migration of {} failed: {}", task, e));
                    self.discard_partial(&outcome);
                    if let Err(revert_err) = self.revert(ctx, &report) {
                        self.logger
                            .error(format!("Reverting completed migrations failed: {}", revert_err));
                    }
                    return Err(e);
                }
                Err(e) => {
                    let warning = format!("{} skipped: {}", task, e);
                    self.logger.warn(&warning);
                    self.discard_partial(&outcome);
                    report.warnings.push(warning);
                }
            }
        }

        Ok(report)
    }

    fn migrate_task(&self, ctx: &OperationContext, task: &MigrationTask, outcome: &mut TaskOutcome) -> Result<()> {
        let source = self.validator.resolve(&task.source)?;
        let destination = self.validator.resolve(&task.destination)?;
        let failure = |message: String| Error::Migration {
            kind: task.kind.to_string(),
            message,
        };

        if destination.starts_with(&source) {
            return Err(failure(format!(
                "destination {} is inside source {}",
                destination.display(),
                source.display()
            )));
        }
        if !source.is_dir() {
            return Err(failure(format!("source {} does not exist", source.display())));
        }

        outcome.created_destination = fs::symlink_metadata(&destination).is_err();

        match task.kind {
            MigrationKind::Data => {
                if !outcome.created_destination && !is_empty_dir(&destination)? {
                    return Err(failure(format!(
                        "destination {} exists and is not empty",
                        destination.display()
                    )));
                }
                outcome.copy_started = true;
                self.copy_tree(ctx, &source, &destination)?;
                self.verify_critical_files(&source, &destination)?;

                let target = self.validator.validate_removal_target(&source)?;
                // From here on the destination holds the only complete copy
                outcome.removed_source = true;
                match fs::remove_dir_all(&target) {
                    Ok(()) => self
                        .logger
                        .info(format!("Removed old data directory {}", target.display())),
                    Err(e) => self.logger.warn(format!(
                        "Data copied, but old directory {} could not be fully removed: {}",
                        target.display(),
                        e
                    )),
                }
            }
            MigrationKind::Logs | MigrationKind::Binlogs => {
                let predicate: Box<dyn Fn(&Path) -> bool> = if task.kind == MigrationKind::Logs {
                    Box::new(|p: &Path| heuristics::is_log_file(p))
                } else {
                    Box::new(|p: &Path| heuristics::is_binlog_file(p, None))
                };
                outcome.copy_started = true;
                self.copy_matching_into(ctx, &source, &destination, predicate.as_ref(), &mut outcome.moved_files)?;

                for relative in &outcome.moved_files {
                    let path = source.join(relative);
                    if let Err(e) = fs::remove_file(&path) {
                        self.logger
                            .warn(format!("Could not remove {}: {}", path.display(), e));
                    }
                }
                outcome.removed_source = true;
            }
        }

        Ok(())
    }

    /// Undo a failed task's partial copy; the source is untouched at that point
    fn discard_partial(&self, outcome: &TaskOutcome) {
        if outcome.removed_source || !outcome.copy_started {
            return;
        }
        let destination = &outcome.task.destination;
        let result = match outcome.task.kind {
            MigrationKind::Data if outcome.created_destination => self.remove_tree(destination),
            MigrationKind::Data => clear_directory(destination),
            MigrationKind::Logs | MigrationKind::Binlogs => {
                for relative in &outcome.moved_files {
                    let copy = destination.join(relative);
                    if let Err(e) = fs::remove_file(&copy) {
                        self.logger
                            .warn(format!("Could not remove partial copy {}: {}", copy.display(), e));
                    }
                }
                if outcome.created_destination {
                    self.remove_tree(destination)
                } else {
                    Ok(())
                }
            }
        };
        if let Err(e) = result {
            self.logger.warn(format!(
                "Could not clean up partial copy at {}: {}",
                destination.display(),
                e
            ));
        }
    }

    /// Undo completed tasks in reverse order
    ///
    /// Every outcome is attempted; failures are collected into one
    /// `Error::Rollback`.
    pub fn revert(&self, ctx: &OperationContext, report: &MigrationReport) -> Result<()> {
        let mut failures = Vec::new();

        for outcome in report.outcomes.iter().rev() {
            self.logger.info(format!("Reverting {}", outcome.task));
            if let Err(e) = self.revert_task(ctx, outcome) {
                self.logger
                    .error(format!("Revert of {} failed: {}", outcome.task, e));
                failures.push(format!("{}: {}", outcome.task, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Rollback(failures.join("; ")))
        }
    }

    fn revert_task(&self, ctx: &OperationContext, outcome: &TaskOutcome) -> Result<()> {
        let task = &outcome.task;
        match task.kind {
            MigrationKind::Data => {
                if outcome.removed_source {
                    self.copy_tree(ctx, &task.destination, &task.source)?;
                    self.verify_critical_files(&task.destination, &task.source)?;
                }
                if outcome.created_destination {
                    self.remove_tree(&task.destination)?;
                } else {
                    clear_directory(&task.destination)?;
                }
            }
            MigrationKind::Logs | MigrationKind::Binlogs => {
                for relative in &outcome.moved_files {
                    let from = task.destination.join(relative);
                    let to = task.source.join(relative);
                    if let Some(parent) = to.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(&from, &to)?;
                    fs::remove_file(&from)?;
                }
                if outcome.created_destination {
                    self.remove_tree(&task.destination)?;
                }
            }
        }
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        let target = self.validator.validate_removal_target(path)?;
        match fs::remove_dir_all(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Remove everything inside `path`, keeping `path` itself
fn clear_directory(path: &Path) -> Result<()> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Logger;
    use crate::safety::SafetyValidator;

    fn migrator() -> DirectoryMigrator {
        DirectoryMigrator::new(SafetyValidator::new(Logger::tracing()), Logger::tracing())
    }

    fn data_dir(root: &Path) -> PathBuf {
        let data = root.join("var-lib-mysql");
        fs::create_dir_all(data.join("mysql")).unwrap();
        fs::write(data.join("ibdata1"), b"ibdata").unwrap();
        fs::write(data.join("mysql/user.ibd"), b"users").unwrap();
        data
    }

    #[test]
    fn test_data_migration_and_revert() {
        let temp = tempfile::tempdir().unwrap();
        let source = data_dir(temp.path());
        let destination = temp.path().join("data/mysql");
        let task = MigrationTask::new(MigrationKind::Data, &source, &destination).unwrap();

        let ctx = OperationContext::default();
        let report = migrator().perform_migration(&ctx, &[task]).unwrap();
        assert!(destination.join("mysql/user.ibd").exists());
        assert!(!source.exists());
        assert!(report.outcomes[0].created_destination);

        migrator().revert(&ctx, &report).unwrap();
        assert_eq!(fs::read(source.join("ibdata1")).unwrap(), b"ibdata");
        assert!(!destination.exists());
    }

    #[test]
    fn test_non_empty_destination_is_refused() {
        let temp = tempfile::tempdir().unwrap();
        let source = data_dir(temp.path());
        let destination = temp.path().join("occupied");
        fs::create_dir(&destination).unwrap();
        fs::write(destination.join("other"), b"x").unwrap();

        let task = MigrationTask::new(MigrationKind::Data, &source, &destination).unwrap();
        let err = migrator()
            .perform_migration(&OperationContext::default(), &[task])
            .unwrap_err();
        assert!(matches!(err, Error::Migration { .. }));
        assert!(source.join("ibdata1").exists());
        assert!(destination.join("other").exists());
    }

    #[test]
    fn test_non_critical_failure_is_a_warning() {
        let temp = tempfile::tempdir().unwrap();
        let task = MigrationTask::new(
            MigrationKind::Logs,
            temp.path().join("missing-logs"),
            temp.path().join("new-logs"),
        )
        .unwrap();
        let report = migrator()
            .perform_migration(&OperationContext::default(), &[task])
            .unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_partial_log_copy_cleanup_reports_failures() {
        let temp = tempfile::tempdir().unwrap();
        let destination = temp.path().join("new-logs");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("error.log"), b"copied").unwrap();

        let sink = std::sync::Arc::new(crate::logging::CaptureSink::new());
        let migrator = DirectoryMigrator::new(
            SafetyValidator::new(Logger::tracing()),
            Logger::with_sink(sink.clone()),
        );
        let outcome = TaskOutcome {
            task: MigrationTask::new(MigrationKind::Logs, temp.path().join("logs"), &destination).unwrap(),
            created_destination: false,
            removed_source: false,
            moved_files: vec![PathBuf::from("error.log"), PathBuf::from("gone.log")],
            copy_started: true,
        };
        migrator.discard_partial(&outcome);

        assert!(!destination.join("error.log").exists());
        assert!(destination.exists());
        assert!(sink.contains("Could not remove partial copy"));
        assert!(sink.contains("gone.log"));
    }

    #[test]
    fn test_critical_failure_reverts_completed_log_task() {
        let temp = tempfile::tempdir().unwrap();
        let logs = temp.path().join("logs");
        fs::create_dir(&logs).unwrap();
        fs::write(logs.join("error.log"), b"boot").unwrap();

        let tasks = vec![
            MigrationTask::new(MigrationKind::Logs, &logs, temp.path().join("new-logs")).unwrap(),
            MigrationTask::new(
                MigrationKind::Data,
                temp.path().join("no-such-data"),
                temp.path().join("new-data"),
            )
            .unwrap(),
        ];
        assert!(
            migrator()
                .perform_migration(&OperationContext::default(), &tasks)
                .is_err()
        );
        assert_eq!(fs::read(logs.join("error.log")).unwrap(), b"boot");
        assert!(!temp.path().join("new-logs").exists());
    }
}
