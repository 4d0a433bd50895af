// src/pipeline/mod.rs

//! Staged operation pipeline with compensating rollback
//!
//! A `Pipeline` runs an ordered list of `Step`s against one
//! `PipelineState`. For each step it calls `validate`, then `execute`.
//! A failed validation stops the run where it is. A failed execution
//! rolls back every step that already executed, in reverse order;
//! rollback errors are collected and never stop the walk.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Running -> Completed
//!                 -> Aborted
//!                 -> RolledBack
//! ```
//!
//! The step list is fixed when the pipeline is assembled. Optional work
//! (backups, data purge) is expressed by leaving steps out, never by a
//! step that skips itself. Preconditions that can be checked up front
//! belong in the safety check step, before the service is stopped.

mod steps;

pub use steps::{
    AssumeYes, BackupStep, CleanupDataStep, Confirm, ConfirmStep, DetectStep, MigrateDirectoriesStep,
    RemovePackagesStep, RewriteConfigStep, SafetyCheckStep, SafetyChecks, StartServiceStep, StopServiceStep,
    UpgradePackagesStep, VerifyStep,
};

use crate::config::OperationConfig;
use crate::context::OperationContext;
use crate::detect::InstallationSnapshot;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::migration::{MigrationKind, MigrationReport, MigrationTask};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A named unit of pipeline work
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Check preconditions; must not change anything
    fn validate(&self, _state: &PipelineState) -> Result<()> {
        Ok(())
    }

    /// Do the work; record what is needed to undo it with `state.record_rollback`
    fn execute(&self, ctx: &OperationContext, state: &mut PipelineState) -> Result<()>;

    /// Undo `execute`; only this step's own rollback data is visible
    fn rollback(&self, _ctx: &OperationContext, _state: &PipelineState) -> Result<()> {
        Ok(())
    }
}

/// A package and the version that was installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub name: String,
    /// Empty when the version could not be determined
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStopRollbackData {
    pub service_name: String,
    pub was_active: bool,
    pub was_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStartRollbackData {
    pub service_name: String,
    pub was_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRemovalRollbackData {
    pub packages: Vec<PackageVersion>,
    pub purged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpgradeRollbackData {
    pub previous: Vec<PackageVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCleanupRollbackData {
    pub data_dir: PathBuf,
    /// Every directory that was removed, data directory first
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRollbackData {
    pub report: MigrationReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRewriteRollbackData {
    pub path: PathBuf,
    pub original: String,
}

/// What a step changed, per step kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackData {
    ServiceStop(ServiceStopRollbackData),
    ServiceStart(ServiceStartRollbackData),
    PackageRemoval(PackageRemovalRollbackData),
    PackageUpgrade(PackageUpgradeRollbackData),
    DataCleanup(DataCleanupRollbackData),
    Migration(MigrationRollbackData),
    ConfigRewrite(ConfigRewriteRollbackData),
}

/// State shared by the steps of one pipeline run
///
/// Rollback data is keyed by the index of the step that wrote it, and a
/// step can only reach the entry of the step currently being run.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    config: OperationConfig,
    installation: Option<InstallationSnapshot>,
    backup_path: Option<PathBuf>,
    migration_batch: Vec<MigrationTask>,
    migrated: Vec<MigrationKind>,
    rollback: BTreeMap<usize, RollbackData>,
    current_step: usize,
}

impl PipelineState {
    pub fn new(config: OperationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// The snapshot taken by the detection step
    pub fn installation(&self) -> Result<&InstallationSnapshot> {
        self.installation
            .as_ref()
            .ok_or_else(|| Error::Validation("installation has not been detected".to_string()))
    }

    pub fn has_installation(&self) -> bool {
        self.installation.is_some()
    }

    pub fn set_installation(&mut self, snapshot: InstallationSnapshot) {
        self.installation = Some(snapshot);
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    pub fn set_backup_path(&mut self, path: PathBuf) {
        self.backup_path = Some(path);
    }

    pub fn migration_batch(&self) -> &[MigrationTask] {
        &self.migration_batch
    }

    pub fn set_migration_batch(&mut self, batch: Vec<MigrationTask>) {
        self.migration_batch = batch;
    }

    /// Directories that now live at their new location
    pub fn migrated(&self) -> &[MigrationKind] {
        &self.migrated
    }

    pub fn set_migrated(&mut self, report: &MigrationReport) {
        self.migrated = report.outcomes.iter().map(|o| o.task.kind).collect();
    }

    /// Store rollback data for the step being executed
    pub fn record_rollback(&mut self, data: RollbackData) {
        self.rollback.insert(self.current_step, data);
    }

    /// Rollback data of the step being executed or rolled back
    pub fn rollback_data(&self) -> Option<&RollbackData> {
        self.rollback.get(&self.current_step)
    }

    /// Index of the step currently running
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub(crate) fn enter_step(&mut self, index: usize) {
        self.current_step = index;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Idle,
    Running,
    Completed,
    /// A step's validation failed; nothing was rolled back
    Aborted,
    RolledBack,
}

/// Where a step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePhase {
    Validate,
    Execute,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validate => write!(f, "validation"),
            Self::Execute => write!(f, "execution"),
        }
    }
}

/// A compensating action that failed
#[derive(Debug)]
pub struct RollbackFailure {
    pub step: String,
    pub error: Error,
}

/// Successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub elapsed: Duration,
}

/// Failed run, after rollback when a step failed to execute
///
/// `error` is the primary cause; `rollback_failures` are secondary.
#[derive(Debug)]
pub struct PipelineFailure {
    pub run_id: Uuid,
    pub pipeline: String,
    pub step: String,
    pub step_index: usize,
    pub phase: FailurePhase,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub elapsed: Duration,
    pub error: Error,
    pub rollback_failures: Vec<RollbackFailure>,
}

impl PipelineFailure {
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }

    pub fn is_protected_path(&self) -> bool {
        self.error.is_protected_path()
    }

    /// Whether every compensating action succeeded
    pub fn rolled_back_cleanly(&self) -> bool {
        self.rollback_failures.is_empty()
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at step {} '{}' ({}) after {}/{} steps: {}",
            self.pipeline,
            self.step_index + 1,
            self.step,
            self.phase,
            self.steps_completed,
            self.steps_total,
            self.error
        )?;
        if !self.rollback_failures.is_empty() {
            write!(f, "; {} rollback action(s) failed", self.rollback_failures.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Ordered steps with reverse-order rollback
pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn Step>>,
    status: PipelineStatus,
    logger: Logger,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("status", &self.status)
            .finish()
    }
}

impl Pipeline {
    pub fn new(name: impl Into<String>, logger: Logger) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            status: PipelineStatus::Idle,
            logger: logger.scoped("pipeline"),
        }
    }

    /// Append a step (builder style)
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Run every step in order
    ///
    /// A validation failure of step `i` stops the run as it stands. An
    /// execution failure of step `i` rolls back steps `i-1` down to `0`
    /// and returns the original error.
    pub fn run(&mut self, ctx: &OperationContext, state: &mut PipelineState) -> std::result::Result<PipelineReport, PipelineFailure> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let total = self.steps.len();
        self.status = PipelineStatus::Running;
        self.logger
            .info(format!("Starting {} ({} steps, run {})", self.name, total, run_id));

        for index in 0..total {
            let step = &self.steps[index];
            state.enter_step(index);
            ctx.report_message(step.name());
            self.logger
                .info(format!("[{}/{}] {}", index + 1, total, step.name()));

            let failure = match step.validate(state) {
                Err(e) => Some((FailurePhase::Validate, e)),
                Ok(()) => ctx
                    .check_cancelled(step.name())
                    .and_then(|()| step.execute(ctx, state))
                    .err()
                    .map(|e| (FailurePhase::Execute, e)),
            };

            if let Some((phase, error)) = failure {
                let step_name = step.name().to_string();
                self.logger
                    .error(format!("Step '{}' failed during {}: {}", step_name, phase, error));
                let rollback_failures = match phase {
                    FailurePhase::Validate => {
                        self.status = PipelineStatus::Aborted;
                        Vec::new()
                    }
                    FailurePhase::Execute => {
                        self.status = PipelineStatus::RolledBack;
                        self.rollback(ctx, state, index)
                    }
                };
                return Err(PipelineFailure {
                    run_id,
                    pipeline: self.name.clone(),
                    step: step_name,
                    step_index: index,
                    phase,
                    steps_completed: index,
                    steps_total: total,
                    elapsed: started.elapsed(),
                    error,
                    rollback_failures,
                });
            }
        }

        self.status = PipelineStatus::Completed;
        let elapsed = started.elapsed();
        self.logger
            .info(format!("{} completed in {:.1}s", self.name, elapsed.as_secs_f64()));
        Ok(PipelineReport {
            run_id,
            steps_completed: total,
            steps_total: total,
            elapsed,
        })
    }

    /// Roll back steps `failed - 1` down to `0`; never stops early
    fn rollback(&self, ctx: &OperationContext, state: &mut PipelineState, failed: usize) -> Vec<RollbackFailure> {
        let mut failures = Vec::new();
        if failed == 0 {
            return failures;
        }

        // Rollback must run even when cancellation caused the failure
        let rollback_ctx = OperationContext::new(ctx.logger().clone());
        let rollback_ctx = match ctx.progress() {
            Some(progress) => rollback_ctx.with_progress(progress.clone()),
            None => rollback_ctx,
        };

        self.logger
            .warn(format!("Rolling back {} completed step(s)", failed));
        for index in (0..failed).rev() {
            let step = &self.steps[index];
            state.enter_step(index);
            rollback_ctx.report_message(&format!("Rolling back {}", step.name()));
            match step.rollback(&rollback_ctx, state) {
                Ok(()) => self.logger.info(format!("Rolled back '{}'", step.name())),
                Err(error) => {
                    self.logger
                        .error(format!("Rollback of '{}' failed: {}", step.name(), error));
                    failures.push(RollbackFailure {
                        step: step.name().to_string(),
                        error,
                    });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::CaptureSink;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: String,
        journal: Journal,
        fail_validate: bool,
        fail_execute: bool,
        fail_rollback: bool,
    }

    impl Recorder {
        fn new(name: &str, journal: &Journal) -> Self {
            Self {
                name: name.to_string(),
                journal: journal.clone(),
                fail_validate: false,
                fail_execute: false,
                fail_rollback: false,
            }
        }

        fn log(&self, event: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", event, self.name));
        }
    }

    impl Step for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn validate(&self, _state: &PipelineState) -> Result<()> {
            if self.fail_validate {
                return Err(Error::Validation(format!("{} not ready", self.name)));
            }
            Ok(())
        }

        fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
            self.log("execute");
            state.record_rollback(RollbackData::ServiceStart(ServiceStartRollbackData {
                service_name: self.name.clone(),
                was_active: false,
            }));
            if self.fail_execute {
                return Err(Error::Execution(format!("{} broke", self.name)));
            }
            Ok(())
        }

        fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
            match state.rollback_data() {
                Some(RollbackData::ServiceStart(data)) if data.service_name == self.name => {}
                other => panic!("{} saw foreign rollback data {:?}", self.name, other),
            }
            self.log("rollback");
            if self.fail_rollback {
                return Err(Error::Rollback(format!("{} stuck", self.name)));
            }
            Ok(())
        }
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_all_steps_complete() {
        let j = journal();
        let mut pipeline = Pipeline::new("test", Logger::tracing())
            .with_step(Recorder::new("a", &j))
            .with_step(Recorder::new("b", &j));
        assert_eq!(pipeline.status(), PipelineStatus::Idle);

        let report = pipeline
            .run(&OperationContext::default(), &mut PipelineState::default())
            .unwrap();
        assert_eq!(report.steps_completed, 2);
        assert_eq!(pipeline.status(), PipelineStatus::Completed);
        assert_eq!(*j.lock().unwrap(), vec!["execute:a", "execute:b"]);
    }

    #[test]
    fn test_rollback_continues_past_failures() {
        let j = journal();
        let mut failing_rollback = Recorder::new("b", &j);
        failing_rollback.fail_rollback = true;
        let mut failing = Recorder::new("c", &j);
        failing.fail_execute = true;

        let sink = Arc::new(CaptureSink::new());
        let mut pipeline = Pipeline::new("test", Logger::with_sink(sink.clone()))
            .with_step(Recorder::new("a", &j))
            .with_step(failing_rollback)
            .with_step(failing);

        let failure = pipeline
            .run(&OperationContext::default(), &mut PipelineState::default())
            .unwrap_err();

        assert_eq!(failure.step, "c");
        assert_eq!(failure.steps_completed, 2);
        assert!(matches!(failure.error, Error::Execution(_)));
        assert_eq!(failure.rollback_failures.len(), 1);
        assert_eq!(failure.rollback_failures[0].step, "b");
        assert_eq!(pipeline.status(), PipelineStatus::RolledBack);
        assert_eq!(
            *j.lock().unwrap(),
            vec!["execute:a", "execute:b", "execute:c", "rollback:b", "rollback:a"]
        );
        assert!(sink.contains("Rollback of 'b' failed"));
    }

    #[test]
    fn test_validation_failure_skips_execute() {
        let j = journal();
        let mut blocked = Recorder::new("b", &j);
        blocked.fail_validate = true;
        let mut pipeline = Pipeline::new("test", Logger::tracing())
            .with_step(Recorder::new("a", &j))
            .with_step(blocked)
            .with_step(Recorder::new("c", &j));

        let failure = pipeline
            .run(&OperationContext::default(), &mut PipelineState::default())
            .unwrap_err();
        assert_eq!(failure.phase, FailurePhase::Validate);
        assert!(failure.error.is_validation());
        assert_eq!(failure.steps_completed, 1);
        assert_eq!(pipeline.status(), PipelineStatus::Aborted);
        assert_eq!(*j.lock().unwrap(), vec!["execute:a"]);
    }

    #[test]
    fn test_first_step_failure_rolls_back_nothing() {
        let j = journal();
        let mut first = Recorder::new("a", &j);
        first.fail_execute = true;
        let mut pipeline = Pipeline::new("test", Logger::tracing()).with_step(first);
        let failure = pipeline
            .run(&OperationContext::default(), &mut PipelineState::default())
            .unwrap_err();
        assert_eq!(failure.steps_completed, 0);
        assert_eq!(*j.lock().unwrap(), vec!["execute:a"]);
    }

    #[test]
    fn test_failure_display() {
        let j = journal();
        let mut failing = Recorder::new("stop", &j);
        failing.fail_execute = true;
        let mut pipeline = Pipeline::new("remove", Logger::tracing()).with_step(failing);
        let failure = pipeline
            .run(&OperationContext::default(), &mut PipelineState::default())
            .unwrap_err();
        let text = failure.to_string();
        assert!(text.starts_with("remove failed at step 1 'stop' (execution) after 0/1 steps"));
    }
}
