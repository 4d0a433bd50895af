// src/operations.rs

//! Lifecycle operations: remove, upgrade, configure
//!
//! Each operation assembles a pipeline from the configuration and runs it
//! against the host collaborators. Step order for all three:
//!
//! ```text
//! detect -> safety checks -> [confirm] -> stop service -> [backup]
//!        -> <mutation steps> -> [start service] -> verify
//! ```
//!
//! The service is stopped before the backup so the archive is taken from a
//! quiescent data directory. Optional steps are left out of the pipeline
//! rather than skipped at run time.

use crate::backup::{ARCHIVE_NAME, BackupEngine, CONFIG_DIR};
use crate::config::OperationConfig;
use crate::context::OperationContext;
use crate::detect::{DefaultLayout, Detector, InstallationSnapshot, MysqlClient, ServerClient, config_candidates};
use crate::logging::Logger;
use crate::migration::DirectoryMigrator;
use crate::pipeline::{
    AssumeYes, BackupStep, CleanupDataStep, Confirm, ConfirmStep, DetectStep, FailurePhase, MigrateDirectoriesStep, Pipeline,
    PipelineFailure, PipelineState, RemovePackagesStep, RewriteConfigStep, SafetyCheckStep, SafetyChecks,
    StartServiceStep, StopServiceStep, UpgradePackagesStep, VerifyStep,
};
use crate::safety::SafetyValidator;
use crate::system::{
    Filesystem, HostFilesystem, PackageFamily, PackageManager, ServiceManager, SystemdServiceManager,
    package_manager_for,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Host collaborators shared by every operation
pub struct Host {
    pub family: PackageFamily,
    pub packages: Arc<dyn PackageManager>,
    pub services: Arc<dyn ServiceManager>,
    pub filesystem: Arc<dyn Filesystem>,
    pub client: Option<Arc<dyn ServerClient>>,
    pub confirm: Arc<dyn Confirm>,
    /// Replaces the family's option file candidates
    pub config_files: Option<Vec<PathBuf>>,
    pub default_layout: DefaultLayout,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    pub logger: Logger,
}

impl Host {
    pub fn new(
        family: PackageFamily,
        packages: Arc<dyn PackageManager>,
        services: Arc<dyn ServiceManager>,
        filesystem: Arc<dyn Filesystem>,
        logger: Logger,
    ) -> Self {
        Self {
            family,
            packages,
            services,
            filesystem,
            client: None,
            confirm: Arc::new(AssumeYes),
            config_files: None,
            default_layout: DefaultLayout::default(),
            verify_attempts: 10,
            verify_interval: Duration::from_secs(2),
            logger,
        }
    }

    /// The real host for `family`
    pub fn system(family: PackageFamily, logger: Logger) -> Self {
        Self::new(
            family,
            package_manager_for(family),
            Arc::new(SystemdServiceManager::new()),
            Arc::new(HostFilesystem::new(logger.clone())),
            logger,
        )
        .with_client(Arc::new(MysqlClient::default()))
    }

    pub fn with_client(mut self, client: Arc<dyn ServerClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_config_files(mut self, files: Vec<PathBuf>) -> Self {
        self.config_files = Some(files);
        self
    }

    pub fn with_default_layout(mut self, layout: DefaultLayout) -> Self {
        self.default_layout = layout;
        self
    }

    /// How often and how long to wait for the service after starting it
    pub fn with_verify_policy(mut self, attempts: u32, interval: Duration) -> Self {
        self.verify_attempts = attempts;
        self.verify_interval = interval;
        self
    }

    /// Detector configured for this host and `config`
    pub fn detector(&self, config: &OperationConfig) -> Detector {
        let mut files = self
            .config_files
            .clone()
            .unwrap_or_else(|| config_candidates(self.family));
        if let Some(primary) = &config.server.config_file {
            files.retain(|f| f != primary);
            files.insert(0, primary.clone());
        }

        let mut detector = Detector::new(self.family, self.packages.clone(), self.services.clone(), self.logger.clone())
            .with_config_files(files)
            .with_default_layout(self.default_layout.clone());
        if let Some(client) = &self.client {
            detector = detector.with_client(client.clone());
        }
        if let Some(service) = &config.server.service_name {
            detector = detector.with_service_name(service.clone());
        }
        detector
    }

    pub fn validator(&self, force: bool) -> SafetyValidator {
        SafetyValidator::new(self.logger.clone()).with_force(force)
    }

    pub fn backup_engine(&self) -> Arc<BackupEngine> {
        Arc::new(BackupEngine::new(self.filesystem.clone(), self.logger.clone()))
    }
}

/// Manual recovery hints shown after a failed operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackInfo {
    pub backup_path: Option<PathBuf>,
    /// Version installed before the operation, empty when unknown
    pub previous_version: String,
    /// Ordered, human-readable steps
    pub instructions: Vec<String>,
}

/// Outcome of one lifecycle operation
#[derive(Debug)]
pub struct OperationResult {
    pub operation: String,
    pub success: bool,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub elapsed: Duration,
    pub backup_path: Option<PathBuf>,
    /// Snapshot taken at the start of the run
    pub snapshot: Option<InstallationSnapshot>,
    pub rollback_info: Option<RollbackInfo>,
    pub failure: Option<PipelineFailure>,
}

impl OperationResult {
    /// The operator declined or the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.is_cancelled())
    }

    pub fn is_protected_path(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.is_protected_path())
    }
}

fn push_prelude(pipeline: &mut Pipeline, host: &Host, config: &OperationConfig, checks: SafetyChecks, prompt: &str) {
    pipeline.push(Box::new(DetectStep::new(host.detector(config))));
    pipeline.push(Box::new(SafetyCheckStep::new(
        host.validator(config.force),
        checks,
        host.logger.clone(),
    )));
    if !config.assume_yes {
        pipeline.push(Box::new(ConfirmStep::new(prompt, host.confirm.clone())));
    }
    pipeline.push(Box::new(StopServiceStep::new(host.services.clone(), host.logger.clone())));
}

/// Steps of `remove`
pub fn remove_pipeline(host: &Host, config: &OperationConfig) -> Pipeline {
    let options = config.remove_options();
    let engine = host.backup_engine();
    let mut pipeline = Pipeline::new("remove", host.logger.clone());

    push_prelude(
        &mut pipeline,
        host,
        config,
        SafetyChecks {
            purge_data: options.purge_data,
            ..SafetyChecks::default()
        },
        if options.purge_data {
            "Remove the database server and DELETE its data?"
        } else {
            "Remove the database server?"
        },
    );
    if let Some(root) = &options.backup_root {
        pipeline.push(Box::new(BackupStep::new(engine.clone(), root)));
    }

    let mut remove = RemovePackagesStep::new(host.packages.clone(), options.purge_config, host.logger.clone());
    if options.backup_root.is_some() {
        remove = remove.with_config_restore(engine.clone());
    }
    pipeline.push(Box::new(remove));

    if options.purge_data {
        let mut cleanup = CleanupDataStep::new(host.filesystem.clone(), host.validator(options.force), host.logger.clone());
        if options.backup_root.is_some() {
            cleanup = cleanup.with_restore(engine);
        }
        pipeline.push(Box::new(cleanup));
    }

    pipeline.push(Box::new(VerifyStep::packages_removed(
        host.services.clone(),
        host.packages.clone(),
        host.logger.clone(),
    )));
    pipeline
}

/// Steps of `upgrade`
pub fn upgrade_pipeline(host: &Host, config: &OperationConfig) -> Pipeline {
    let options = config.upgrade_options();
    let mut pipeline = Pipeline::new("upgrade", host.logger.clone());

    push_prelude(
        &mut pipeline,
        host,
        config,
        SafetyChecks {
            upgrade_targets: options.target_packages.clone(),
            ..SafetyChecks::default()
        },
        "Upgrade the database server?",
    );
    if let Some(root) = &options.backup_root {
        pipeline.push(Box::new(BackupStep::new(host.backup_engine(), root)));
    }
    pipeline.push(Box::new(UpgradePackagesStep::new(
        host.packages.clone(),
        options.target_packages,
        host.logger.clone(),
    )));
    push_restart(&mut pipeline, host);
    pipeline
}

/// Steps of `configure`
pub fn configure_pipeline(host: &Host, config: &OperationConfig) -> Pipeline {
    let options = config.configure_options();
    let mut pipeline = Pipeline::new("configure", host.logger.clone());

    push_prelude(
        &mut pipeline,
        host,
        config,
        SafetyChecks {
            layout: Some(options.layout.clone()),
            ..SafetyChecks::default()
        },
        "Relocate database directories?",
    );
    if let Some(root) = &options.backup_root {
        pipeline.push(Box::new(BackupStep::new(host.backup_engine(), root)));
    }
    if !options.layout.is_empty() {
        let migrator = DirectoryMigrator::new(host.validator(options.force), host.logger.clone());
        pipeline.push(Box::new(MigrateDirectoriesStep::new(
            migrator,
            options.layout.clone(),
            host.logger.clone(),
        )));
        pipeline.push(Box::new(RewriteConfigStep::new(options.layout, host.logger.clone())));
    }
    push_restart(&mut pipeline, host);
    pipeline
}

fn push_restart(pipeline: &mut Pipeline, host: &Host) {
    pipeline.push(Box::new(StartServiceStep::new(host.services.clone(), host.logger.clone())));
    pipeline.push(Box::new(VerifyStep::service_running(
        host.services.clone(),
        host.packages.clone(),
        host.verify_attempts,
        host.verify_interval,
        host.logger.clone(),
    )));
}

pub fn run_remove(host: &Host, ctx: &OperationContext, config: &OperationConfig) -> OperationResult {
    execute(remove_pipeline(host, config), ctx, config)
}

pub fn run_upgrade(host: &Host, ctx: &OperationContext, config: &OperationConfig) -> OperationResult {
    execute(upgrade_pipeline(host, config), ctx, config)
}

pub fn run_configure(host: &Host, ctx: &OperationContext, config: &OperationConfig) -> OperationResult {
    execute(configure_pipeline(host, config), ctx, config)
}

fn execute(mut pipeline: Pipeline, ctx: &OperationContext, config: &OperationConfig) -> OperationResult {
    let mut state = PipelineState::new(config.clone());
    let outcome = pipeline.run(ctx, &mut state);
    let snapshot = state.installation().ok().cloned();
    let backup_path = state.backup_path().map(Path::to_path_buf);

    match outcome {
        Ok(report) => OperationResult {
            operation: pipeline.name().to_string(),
            success: true,
            steps_completed: report.steps_completed,
            steps_total: report.steps_total,
            elapsed: report.elapsed,
            backup_path,
            snapshot,
            rollback_info: None,
            failure: None,
        },
        Err(failure) => {
            let info = rollback_info(pipeline.name(), &failure, snapshot.as_ref(), backup_path.as_deref());
            OperationResult {
                operation: pipeline.name().to_string(),
                success: false,
                steps_completed: failure.steps_completed,
                steps_total: failure.steps_total,
                elapsed: failure.elapsed,
                backup_path,
                snapshot,
                rollback_info: Some(info),
                failure: Some(failure),
            }
        }
    }
}

/// Build the recovery procedure for a failed run
pub fn rollback_info(
    operation: &str,
    failure: &PipelineFailure,
    snapshot: Option<&InstallationSnapshot>,
    backup_path: Option<&Path>,
) -> RollbackInfo {
    let mut instructions = Vec::new();
    let previous_version = snapshot.map(|s| s.version().to_string()).unwrap_or_default();

    if failure.phase == FailurePhase::Validate {
        instructions.push(format!(
            "Stopped before '{}' made any change; the {} step(s) already completed were not undone.",
            failure.step, failure.steps_completed
        ));
        if let Some(snapshot) = snapshot.filter(|s| s.service_active() && failure.steps_completed > 0) {
            instructions.push(format!(
                "If the service was stopped, start it again: systemctl start {}",
                snapshot.service_name()
            ));
        }
    } else if failure.rolled_back_cleanly() {
        instructions.push(format!(
            "Automatic rollback completed; the system should be as it was before `{}`.",
            operation
        ));
    } else {
        let steps: Vec<&str> = failure.rollback_failures.iter().map(|f| f.step.as_str()).collect();
        instructions.push(format!(
            "Automatic rollback failed for: {}. Review the log before retrying.",
            steps.join(", ")
        ));
    }

    if let Some(snapshot) = snapshot.filter(|s| s.is_installed()) {
        if !snapshot.service_name().is_empty() {
            instructions.push(format!(
                "Check the service: systemctl status {}",
                snapshot.service_name()
            ));
        }
        if !previous_version.is_empty() {
            instructions.push(format!(
                "If the package is missing or changed, reinstall {} version {} with the system package manager.",
                snapshot.package_name(),
                previous_version
            ));
        }
        if let (Some(backup), Some(data_dir)) = (backup_path, snapshot.data_dir()) {
            let parent = data_dir.parent().unwrap_or(Path::new("/"));
            instructions.push(format!(
                "With the service stopped, restore data: tar -xzf {} -C {}",
                backup.join(ARCHIVE_NAME).display(),
                parent.display()
            ));
        }
    }
    if let Some(backup) = backup_path {
        instructions.push(format!(
            "Saved option files are in {}; copy them back to their original locations if needed.",
            backup.join(CONFIG_DIR).display()
        ));
    }

    RollbackInfo {
        backup_path: backup_path.map(Path::to_path_buf),
        previous_version,
        instructions,
    }
}
