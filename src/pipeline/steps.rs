// src/pipeline/steps.rs

//! Concrete pipeline steps

use super::{
    ConfigRewriteRollbackData, DataCleanupRollbackData, MigrationRollbackData, PackageRemovalRollbackData,
    PackageUpgradeRollbackData, PackageVersion, PipelineState, RollbackData, ServiceStartRollbackData,
    ServiceStopRollbackData, Step,
};
use crate::backup::BackupEngine;
use crate::context::OperationContext;
use crate::detect::{Detector, InstallationSnapshot, cnf, extract_version_token};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::migration::{DesiredLayout, DirectoryMigrator, MigrationKind, plan_migrations};
use crate::safety::{SafetyValidator, clean_path};
use crate::system::{Filesystem, PackageManager, ServiceManager};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Operator confirmation before destructive work
pub trait Confirm: Send + Sync {
    /// `Ok(false)` means the operator declined
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Confirms everything (`--yes`)
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

fn package_versions(packages: &dyn PackageManager, names: &[String], logger: &Logger) -> Vec<PackageVersion> {
    names
        .iter()
        .map(|name| {
            let version = match packages.describe(name) {
                Ok(Some(line)) => extract_version_token(&line).unwrap_or_default(),
                Ok(None) => String::new(),
                Err(e) => {
                    logger.warn(format!("Cannot read version of {}: {}", name, e));
                    String::new()
                }
            };
            PackageVersion {
                name: name.clone(),
                version,
            }
        })
        .collect()
}

/// Reinstall packages at their recorded versions (latest when unknown)
fn reinstall(packages: &dyn PackageManager, recorded: &[PackageVersion]) -> Result<()> {
    let pinned: Vec<(String, String)> = recorded
        .iter()
        .filter(|p| !p.version.is_empty())
        .map(|p| (p.name.clone(), p.version.clone()))
        .collect();
    let unpinned: Vec<String> = recorded
        .iter()
        .filter(|p| p.version.is_empty())
        .map(|p| p.name.clone())
        .collect();

    if !pinned.is_empty() {
        packages.install_versions(&pinned)?;
    }
    if !unpinned.is_empty() {
        packages.install(&unpinned)?;
    }
    Ok(())
}

/// Take a fresh installation snapshot
pub struct DetectStep {
    detector: Detector,
}

impl DetectStep {
    pub fn new(detector: Detector) -> Self {
        Self { detector }
    }
}

impl Step for DetectStep {
    fn name(&self) -> &str {
        "detect installation"
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let snapshot = self.detector.detect()?;
        state.set_installation(snapshot);
        Ok(())
    }
}

/// What `SafetyCheckStep` verifies
#[derive(Debug, Clone, Default)]
pub struct SafetyChecks {
    /// The data, log and binlog directories are going to be removed
    pub purge_data: bool,
    /// Directories are going to be relocated
    pub layout: Option<DesiredLayout>,
    /// Packages named for upgrade must be installed
    pub upgrade_targets: Vec<String>,
}

/// Upgrade targets the snapshot does not list as installed
fn check_upgrade_targets(snapshot: &InstallationSnapshot, targets: &[String]) -> Result<()> {
    let installed = snapshot.packages();
    let unknown: Vec<&str> = targets
        .iter()
        .filter(|t| !installed.contains(*t))
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "not installed, cannot upgrade: {}",
            unknown.join(", ")
        )))
    }
}

/// Refuse inconsistent state and protected paths before anything changes
pub struct SafetyCheckStep {
    validator: SafetyValidator,
    checks: SafetyChecks,
    logger: Logger,
}

impl SafetyCheckStep {
    pub fn new(validator: SafetyValidator, checks: SafetyChecks, logger: Logger) -> Self {
        Self {
            validator,
            checks,
            logger: logger.scoped("safety"),
        }
    }

    fn check_purge(&self, snapshot: &InstallationSnapshot) -> Result<()> {
        let data_dir = snapshot
            .data_dir()
            .ok_or_else(|| Error::Validation("no data directory detected".to_string()))?;
        if data_dir.exists() {
            self.validator.validate_data_directory(data_dir)?;
        } else {
            self.validator.validate_removal_target(data_dir)?;
        }
        for dir in [snapshot.log_dir(), snapshot.binlog_dir()].into_iter().flatten() {
            self.validator.validate_removal_target(dir)?;
        }
        Ok(())
    }

    fn check_layout(&self, snapshot: &InstallationSnapshot, layout: &DesiredLayout) -> Result<()> {
        let tasks = plan_migrations(snapshot, layout);
        for task in &tasks {
            // A destination may be removed again on rollback
            self.validator.validate_removal_target(&task.destination)?;
            if task.critical {
                self.validator.validate_data_directory(&task.source)?;
            } else {
                self.validator.validate_removal_target(&task.source)?;
            }
        }
        if !layout.is_empty() && snapshot.config_files().is_empty() {
            return Err(Error::Validation(
                "no server option file found to record the new layout".to_string(),
            ));
        }
        self.logger
            .info(format!("{} directory migration(s) planned", tasks.len()));
        Ok(())
    }
}

impl Step for SafetyCheckStep {
    fn name(&self) -> &str {
        "safety checks"
    }

    fn validate(&self, state: &PipelineState) -> Result<()> {
        let snapshot = state.installation()?;
        if !snapshot.is_installed() {
            return Err(Error::Validation(
                "no database server installation detected".to_string(),
            ));
        }
        if self.checks.purge_data {
            self.check_purge(snapshot)?;
        }
        if let Some(layout) = &self.checks.layout {
            self.check_layout(snapshot, layout)?;
        }
        check_upgrade_targets(snapshot, &self.checks.upgrade_targets)
    }

    fn execute(&self, _ctx: &OperationContext, _state: &mut PipelineState) -> Result<()> {
        self.logger.debug("All safety checks passed");
        Ok(())
    }
}

/// Ask the operator before continuing
pub struct ConfirmStep {
    prompt: String,
    confirm: Arc<dyn Confirm>,
}

impl ConfirmStep {
    pub fn new(prompt: impl Into<String>, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            prompt: prompt.into(),
            confirm,
        }
    }
}

impl Step for ConfirmStep {
    fn name(&self) -> &str {
        "confirm"
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let snapshot = state.installation()?;
        let prompt = format!(
            "{} ({} {})",
            self.prompt,
            snapshot.package_name(),
            snapshot.version()
        );
        if self.confirm.confirm(&prompt)? {
            Ok(())
        } else {
            Err(Error::Cancelled("declined by operator".to_string()))
        }
    }
}

/// Stop the server; already stopped is fine
pub struct StopServiceStep {
    services: Arc<dyn ServiceManager>,
    logger: Logger,
}

impl StopServiceStep {
    pub fn new(services: Arc<dyn ServiceManager>, logger: Logger) -> Self {
        Self {
            services,
            logger: logger.scoped("service"),
        }
    }
}

impl Step for StopServiceStep {
    fn name(&self) -> &str {
        "stop service"
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let name = state.installation()?.service_name().to_string();
        if name.is_empty() {
            self.logger.info("No service unit detected; nothing to stop");
            return Ok(());
        }

        let was_active = self.services.is_active(&name)?;
        let was_enabled = self.services.is_enabled(&name)?;
        state.record_rollback(RollbackData::ServiceStop(ServiceStopRollbackData {
            service_name: name.clone(),
            was_active,
            was_enabled,
        }));

        if was_active {
            self.logger.info(format!("Stopping {}", name));
            self.services.stop(&name)?;
        } else {
            self.logger.info(format!("{} is already stopped", name));
        }
        Ok(())
    }

    fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        let Some(RollbackData::ServiceStop(data)) = state.rollback_data() else {
            return Ok(());
        };
        if !self.services.exists(&data.service_name)? {
            return Err(Error::Rollback(format!(
                "service {} no longer exists; start it manually after reinstalling",
                data.service_name
            )));
        }
        if data.was_enabled && !self.services.is_enabled(&data.service_name)? {
            self.services.enable(&data.service_name)?;
        }
        if data.was_active && !self.services.is_active(&data.service_name)? {
            self.logger.info(format!("Restarting {}", data.service_name));
            self.services.start(&data.service_name)?;
        }
        Ok(())
    }
}

/// Archive data and option files; the backup is kept even on rollback
pub struct BackupStep {
    engine: Arc<BackupEngine>,
    root: PathBuf,
}

impl BackupStep {
    pub fn new(engine: Arc<BackupEngine>, root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            root: root.into(),
        }
    }
}

impl Step for BackupStep {
    fn name(&self) -> &str {
        "backup"
    }

    fn execute(&self, ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let outcome = self.engine.backup(ctx, state.installation()?, &self.root)?;
        state.set_backup_path(outcome.path);
        Ok(())
    }
}

/// Remove every detected server package
pub struct RemovePackagesStep {
    packages: Arc<dyn PackageManager>,
    purge_config: bool,
    config_restore: Option<Arc<BackupEngine>>,
    logger: Logger,
}

impl RemovePackagesStep {
    pub fn new(packages: Arc<dyn PackageManager>, purge_config: bool, logger: Logger) -> Self {
        Self {
            packages,
            purge_config,
            config_restore: None,
            logger: logger.scoped("packages"),
        }
    }

    /// Restore purged option files from the backup on rollback
    pub fn with_config_restore(mut self, engine: Arc<BackupEngine>) -> Self {
        self.config_restore = Some(engine);
        self
    }
}

impl Step for RemovePackagesStep {
    fn name(&self) -> &str {
        "remove packages"
    }

    fn validate(&self, state: &PipelineState) -> Result<()> {
        if state.installation()?.packages().is_empty() {
            return Err(Error::Validation("no packages to remove".to_string()));
        }
        Ok(())
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let names = state.installation()?.packages().to_vec();
        let recorded = package_versions(self.packages.as_ref(), &names, &self.logger);
        state.record_rollback(RollbackData::PackageRemoval(PackageRemovalRollbackData {
            packages: recorded,
            purged: self.purge_config,
        }));

        self.logger.info(format!(
            "{} {}",
            if self.purge_config { "Purging" } else { "Removing" },
            names.join(" ")
        ));
        self.packages.remove(&names, self.purge_config)
    }

    fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        let Some(RollbackData::PackageRemoval(data)) = state.rollback_data() else {
            return Ok(());
        };
        self.logger.info("Reinstalling removed packages");
        reinstall(self.packages.as_ref(), &data.packages)?;

        if data.purged {
            match (&self.config_restore, state.backup_path()) {
                (Some(engine), Some(backup)) => {
                    engine.restore_config_files(backup)?;
                }
                _ => self
                    .logger
                    .warn("Option files were purged and no backup is available"),
            }
        }
        Ok(())
    }
}

/// Delete the data, log and binlog directories
pub struct CleanupDataStep {
    filesystem: Arc<dyn Filesystem>,
    validator: SafetyValidator,
    restore: Option<Arc<BackupEngine>>,
    logger: Logger,
}

impl CleanupDataStep {
    pub fn new(filesystem: Arc<dyn Filesystem>, validator: SafetyValidator, logger: Logger) -> Self {
        Self {
            filesystem,
            validator,
            restore: None,
            logger: logger.scoped("cleanup"),
        }
    }

    /// Restore the data directory from the backup on rollback
    pub fn with_restore(mut self, engine: Arc<BackupEngine>) -> Self {
        self.restore = Some(engine);
        self
    }
}

impl Step for CleanupDataStep {
    fn name(&self) -> &str {
        "remove data"
    }

    fn validate(&self, state: &PipelineState) -> Result<()> {
        let snapshot = state.installation()?;
        match snapshot.data_dir() {
            Some(dir) if dir.exists() => self.validator.validate_data_directory(dir).map(|_| ()),
            Some(dir) => self.validator.validate_removal_target(dir).map(|_| ()),
            None => Err(Error::Validation("no data directory detected".to_string())),
        }
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let snapshot = state.installation()?;
        let Some(data_dir) = snapshot.data_dir().map(Path::to_path_buf) else {
            return Ok(());
        };

        let mut targets: Vec<PathBuf> = vec![data_dir.clone()];
        for dir in [snapshot.log_dir(), snapshot.binlog_dir()].into_iter().flatten() {
            let dir = dir.to_path_buf();
            if !targets.iter().any(|t| dir.starts_with(t)) {
                targets.push(dir);
            }
        }

        let mut removed = Vec::new();
        let mut result = Ok(());
        for target in &targets {
            if !self.filesystem.exists(target) {
                continue;
            }
            self.logger.info(format!("Removing {}", target.display()));
            if let Err(e) = self.filesystem.safe_remove(target, &self.validator) {
                result = Err(e);
                break;
            }
            removed.push(clean_path(target));
        }

        state.record_rollback(RollbackData::DataCleanup(DataCleanupRollbackData {
            data_dir,
            removed,
        }));
        result
    }

    fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        let Some(RollbackData::DataCleanup(data)) = state.rollback_data() else {
            return Ok(());
        };
        if data.removed.is_empty() {
            return Ok(());
        }
        match (&self.restore, state.backup_path()) {
            (Some(engine), Some(backup)) => {
                engine.restore_data(backup, &data.data_dir)?;
                let logs: Vec<_> = data.removed.iter().filter(|p| **p != data.data_dir).collect();
                if !logs.is_empty() {
                    self.logger.warn(format!(
                        "Log directories are not part of the backup and stay removed: {}",
                        logs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
                    ));
                }
                Ok(())
            }
            _ => Err(Error::Rollback(format!(
                "{} was removed and no backup is available",
                data.data_dir.display()
            ))),
        }
    }
}

/// Upgrade the server packages in place
pub struct UpgradePackagesStep {
    packages: Arc<dyn PackageManager>,
    targets: Vec<String>,
    logger: Logger,
}

impl UpgradePackagesStep {
    /// `targets` empty means every detected package
    pub fn new(packages: Arc<dyn PackageManager>, targets: Vec<String>, logger: Logger) -> Self {
        Self {
            packages,
            targets,
            logger: logger.scoped("packages"),
        }
    }
}

impl Step for UpgradePackagesStep {
    fn name(&self) -> &str {
        "upgrade packages"
    }

    fn validate(&self, state: &PipelineState) -> Result<()> {
        check_upgrade_targets(state.installation()?, &self.targets)
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let names = if self.targets.is_empty() {
            state.installation()?.packages().to_vec()
        } else {
            self.targets.clone()
        };
        let previous = package_versions(self.packages.as_ref(), &names, &self.logger);
        state.record_rollback(RollbackData::PackageUpgrade(PackageUpgradeRollbackData { previous }));

        if let Err(e) = self.packages.update_cache() {
            self.logger
                .warn(format!("Package cache refresh failed: {}", e));
        }
        self.logger.info(format!("Upgrading {}", names.join(" ")));
        self.packages.upgrade(&names)
    }

    fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        let Some(RollbackData::PackageUpgrade(data)) = state.rollback_data() else {
            return Ok(());
        };
        self.logger.info("Returning packages to their previous versions");
        reinstall(self.packages.as_ref(), &data.previous)
    }
}

/// Relocate directories according to the desired layout
pub struct MigrateDirectoriesStep {
    migrator: DirectoryMigrator,
    layout: DesiredLayout,
    logger: Logger,
}

impl MigrateDirectoriesStep {
    pub fn new(migrator: DirectoryMigrator, layout: DesiredLayout, logger: Logger) -> Self {
        Self {
            migrator,
            layout,
            logger: logger.scoped("migration"),
        }
    }
}

impl Step for MigrateDirectoriesStep {
    fn name(&self) -> &str {
        "migrate directories"
    }

    fn execute(&self, ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let batch = plan_migrations(state.installation()?, &self.layout);
        state.set_migration_batch(batch.clone());
        if batch.is_empty() {
            self.logger.info("Directories already in place");
            return Ok(());
        }

        let report = self.migrator.perform_migration(ctx, &batch)?;
        for warning in &report.warnings {
            self.logger.warn(warning);
        }
        state.set_migrated(&report);
        state.record_rollback(RollbackData::Migration(MigrationRollbackData { report }));
        Ok(())
    }

    fn rollback(&self, ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        match state.rollback_data() {
            Some(RollbackData::Migration(data)) => self.migrator.revert(ctx, &data.report),
            _ => Ok(()),
        }
    }
}

/// Point the server option file at the new directories
pub struct RewriteConfigStep {
    layout: DesiredLayout,
    logger: Logger,
}

impl RewriteConfigStep {
    pub fn new(layout: DesiredLayout, logger: Logger) -> Self {
        Self {
            layout,
            logger: logger.scoped("config"),
        }
    }

    /// The first option file with a server section, else the first one
    fn target_file(snapshot: &InstallationSnapshot) -> Option<PathBuf> {
        let files = snapshot.config_files();
        files
            .iter()
            .find(|p| {
                fs::read_to_string(p)
                    .map(|c| cnf::has_server_section(&c))
                    .unwrap_or(false)
            })
            .or_else(|| files.first())
            .cloned()
    }

    /// Directives for the directories that were actually moved
    fn updates(&self, snapshot: &InstallationSnapshot, migrated: &[MigrationKind]) -> Vec<(String, String)> {
        let mut updates = Vec::new();
        for kind in migrated {
            match (kind, &self.layout) {
                (MigrationKind::Data, DesiredLayout { data_dir: Some(dir), .. }) => {
                    updates.push(("datadir".to_string(), dir.display().to_string()));
                }
                (MigrationKind::Logs, DesiredLayout { log_dir: Some(dir), .. }) => {
                    updates.push(("log_error".to_string(), dir.join("error.log").display().to_string()));
                }
                (MigrationKind::Binlogs, DesiredLayout { binlog_dir: Some(dir), .. }) => {
                    let base = snapshot.binlog_basename().unwrap_or("mysql-bin");
                    updates.push(("log_bin".to_string(), dir.join(base).display().to_string()));
                }
                _ => {}
            }
        }
        updates
    }
}

impl Step for RewriteConfigStep {
    fn name(&self) -> &str {
        "rewrite configuration"
    }

    fn validate(&self, state: &PipelineState) -> Result<()> {
        match Self::target_file(state.installation()?) {
            Some(_) => Ok(()),
            None => Err(Error::Validation("no server option file to update".to_string())),
        }
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let snapshot = state.installation()?;
        let path = Self::target_file(snapshot)
            .ok_or_else(|| Error::NotFound("server option file".to_string()))?;
        let updates = self.updates(snapshot, state.migrated());
        if updates.is_empty() {
            self.logger.info("No directory moved; option file left unchanged");
            return Ok(());
        }

        let original = fs::read_to_string(&path)?;
        let rewritten = cnf::rewrite_directives(&original, &updates);
        state.record_rollback(RollbackData::ConfigRewrite(ConfigRewriteRollbackData {
            path: path.clone(),
            original,
        }));

        fs::write(&path, rewritten)?;
        self.logger.info(format!(
            "Updated {}: {}",
            path.display(),
            updates.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(", ")
        ));
        Ok(())
    }

    fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        let Some(RollbackData::ConfigRewrite(data)) = state.rollback_data() else {
            return Ok(());
        };
        fs::write(&data.path, &data.original)?;
        self.logger
            .info(format!("Restored original {}", data.path.display()));
        Ok(())
    }
}

/// Start the server; already running is fine
pub struct StartServiceStep {
    services: Arc<dyn ServiceManager>,
    logger: Logger,
}

impl StartServiceStep {
    pub fn new(services: Arc<dyn ServiceManager>, logger: Logger) -> Self {
        Self {
            services,
            logger: logger.scoped("service"),
        }
    }
}

impl Step for StartServiceStep {
    fn name(&self) -> &str {
        "start service"
    }

    fn execute(&self, _ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let name = state.installation()?.service_name().to_string();
        if name.is_empty() {
            self.logger.warn("No service unit detected; not starting anything");
            return Ok(());
        }

        let was_active = self.services.is_active(&name)?;
        state.record_rollback(RollbackData::ServiceStart(ServiceStartRollbackData {
            service_name: name.clone(),
            was_active,
        }));
        if was_active {
            self.logger.info(format!("{} is already running", name));
            return Ok(());
        }
        self.logger.info(format!("Starting {}", name));
        self.services.start(&name)
    }

    fn rollback(&self, _ctx: &OperationContext, state: &PipelineState) -> Result<()> {
        match state.rollback_data() {
            Some(RollbackData::ServiceStart(data)) if !data.was_active => {
                if self.services.is_active(&data.service_name)? {
                    self.services.stop(&data.service_name)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
enum Expectation {
    ServiceRunning { attempts: u32, interval: Duration },
    PackagesRemoved,
}

/// Check the outcome of the operation
pub struct VerifyStep {
    expectation: Expectation,
    services: Arc<dyn ServiceManager>,
    packages: Arc<dyn PackageManager>,
    logger: Logger,
}

impl VerifyStep {
    /// The service must report active and running within `attempts` polls
    pub fn service_running(
        services: Arc<dyn ServiceManager>,
        packages: Arc<dyn PackageManager>,
        attempts: u32,
        interval: Duration,
        logger: Logger,
    ) -> Self {
        Self {
            expectation: Expectation::ServiceRunning {
                attempts: attempts.max(1),
                interval,
            },
            services,
            packages,
            logger: logger.scoped("verify"),
        }
    }

    /// No detected package may remain installed
    pub fn packages_removed(services: Arc<dyn ServiceManager>, packages: Arc<dyn PackageManager>, logger: Logger) -> Self {
        Self {
            expectation: Expectation::PackagesRemoved,
            services,
            packages,
            logger: logger.scoped("verify"),
        }
    }
}

impl Step for VerifyStep {
    fn name(&self) -> &str {
        "verify"
    }

    fn execute(&self, ctx: &OperationContext, state: &mut PipelineState) -> Result<()> {
        let snapshot = state.installation()?;
        match &self.expectation {
            Expectation::ServiceRunning { attempts, interval } => {
                let name = snapshot.service_name();
                if name.is_empty() {
                    self.logger.warn("No service unit to verify");
                    return Ok(());
                }
                for attempt in 1..=*attempts {
                    ctx.check_cancelled("service verification")?;
                    let status = self.services.status(name)?;
                    if status.active && status.running {
                        self.logger.info(format!("{} is running", name));
                        return Ok(());
                    }
                    self.logger
                        .debug(format!("{} not running yet (attempt {}/{})", name, attempt, attempts));
                    if attempt < *attempts {
                        thread::sleep(*interval);
                    }
                }
                Err(Error::Execution(format!("service {} did not come up", name)))
            }
            Expectation::PackagesRemoved => {
                let mut remaining = Vec::new();
                for package in snapshot.packages() {
                    if self.packages.is_installed(package)? {
                        remaining.push(package.as_str());
                    }
                }
                if remaining.is_empty() {
                    self.logger.info("All server packages removed");
                    Ok(())
                } else {
                    Err(Error::Execution(format!(
                        "packages still installed: {}",
                        remaining.join(", ")
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_updates() {
        let snapshot = InstallationSnapshot::builder("mysql-server", "8.0.36")
            .binlog_basename("db-bin")
            .build();
        let step = RewriteConfigStep::new(
            DesiredLayout {
                data_dir: Some("/data/mysql".into()),
                log_dir: None,
                binlog_dir: Some("/data/binlog".into()),
            },
            Logger::tracing(),
        );
        assert_eq!(
            step.updates(&snapshot, &[MigrationKind::Data, MigrationKind::Logs, MigrationKind::Binlogs]),
            vec![
                ("datadir".to_string(), "/data/mysql".to_string()),
                ("log_bin".to_string(), "/data/binlog/db-bin".to_string()),
            ]
        );
    }

    #[test]
    fn test_rewrite_config_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let cnf_path = temp.path().join("my.cnf");
        let original = "[client]\nport = 3306\n\n[mysqld]\ndatadir = /var/lib/mysql\n";
        fs::write(&cnf_path, original).unwrap();

        let snapshot = InstallationSnapshot::builder("mysql-server", "8.0.36")
            .config_file(&cnf_path)
            .build();
        let mut state = PipelineState::default();
        state.set_installation(snapshot);

        let step = RewriteConfigStep::new(
            DesiredLayout {
                data_dir: Some("/data/mysql".into()),
                ..Default::default()
            },
            Logger::tracing(),
        );
        let ctx = OperationContext::default();
        step.validate(&state).unwrap();
        step.execute(&ctx, &mut state).unwrap();
        assert!(fs::read_to_string(&cnf_path).unwrap().contains("datadir = /data/mysql"));

        step.rollback(&ctx, &state).unwrap();
        assert_eq!(fs::read_to_string(&cnf_path).unwrap(), original);
    }

    #[test]
    fn test_confirm_declined_is_cancelled() {
        struct Never;
        impl Confirm for Never {
            fn confirm(&self, _prompt: &str) -> Result<bool> {
                Ok(false)
            }
        }

        let mut state = PipelineState::default();
        state.set_installation(InstallationSnapshot::builder("mariadb-server", "10.11.6").build());
        let err = ConfirmStep::new("Remove?", Arc::new(Never))
            .execute(&OperationContext::default(), &mut state)
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
