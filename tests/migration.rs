// tests/migration.rs

//! Directory migration tests against real temporary trees.

mod common;

use common::{FakeServiceManager, HostLayout, capture_logger, create_data_dir, mysql_fakes};
use nix::sys::stat::Mode;
use sqlwarden::backup::sha256_file;
use sqlwarden::heuristics;
use sqlwarden::{
    DirectoryMigrator, MigrationKind, MigrationTask, OperationContext, SafetyValidator, run_configure,
};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

fn migrator() -> (DirectoryMigrator, OperationContext) {
    let (logger, _sink) = capture_logger();
    (
        DirectoryMigrator::new(SafetyValidator::new(logger.clone()), logger.clone()),
        OperationContext::new(logger),
    )
}

/// Relative path -> sha256 of every regular file under `root`
fn checksums(root: &Path) -> BTreeMap<PathBuf, String> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                sha256_file(e.path()).unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_copy_tree_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("src");
    create_data_dir(&src);
    fs::create_dir_all(src.join("shop/archive/2023")).unwrap();
    fs::write(src.join("shop/archive/2023/q1.ibd"), vec![9u8; 3 * 1024 * 1024]).unwrap();
    fs::set_permissions(src.join("auto.cnf"), fs::Permissions::from_mode(0o640)).unwrap();
    symlink("../ibdata1", src.join("shop/ibdata-link")).unwrap();
    nix::unistd::mkfifo(&src.join("mysql.sock.fifo"), Mode::S_IRUSR | Mode::S_IWUSR).unwrap();

    let dst = temp.path().join("dst/mysql");
    let (migrator, ctx) = migrator();
    let stats = migrator.copy_tree(&ctx, &src, &dst).unwrap();

    assert_eq!(checksums(&src), checksums(&dst));
    assert_eq!(stats.symlinks, 1);
    assert_eq!(stats.skipped_special, 1);
    assert_eq!(
        fs::read_link(dst.join("shop/ibdata-link")).unwrap(),
        PathBuf::from("../ibdata1")
    );
    assert!(fs::symlink_metadata(dst.join("mysql.sock.fifo")).is_err());
    assert_eq!(
        fs::metadata(dst.join("auto.cnf")).unwrap().permissions().mode() & 0o777,
        0o640
    );
    migrator.verify_critical_files(&src, &dst).unwrap();
}

#[test]
fn test_copy_matching_files_selects_logs() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("logs");
    fs::create_dir_all(src.join("archive")).unwrap();
    fs::write(src.join("error.log"), "e").unwrap();
    fs::write(src.join("slow.log.1"), "s").unwrap();
    fs::write(src.join("archive/general.log.2.gz"), "g").unwrap();
    fs::write(src.join("notes.txt"), "n").unwrap();
    fs::write(src.join("ib_logfile0"), "redo").unwrap();
    create_data_dir(&src.join("datadir"));
    fs::write(src.join("datadir/host.err"), "inside data").unwrap();

    let dst = temp.path().join("new/logs");
    let (migrator, ctx) = migrator();
    let mut copied = migrator
        .copy_matching_files(&ctx, &src, &dst, &|p: &Path| heuristics::is_log_file(p))
        .unwrap();
    copied.sort();

    assert_eq!(
        copied,
        vec![
            PathBuf::from("archive/general.log.2.gz"),
            PathBuf::from("error.log"),
            PathBuf::from("slow.log.1"),
        ]
    );
    assert!(dst.join("archive/general.log.2.gz").is_file());
    assert!(!dst.join("notes.txt").exists());
    assert!(!dst.join("ib_logfile0").exists());
    assert!(!dst.join("datadir").exists());
    // Copy leaves the source alone
    assert!(src.join("error.log").is_file());
}

#[test]
fn test_data_task_moves_and_reverts() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("var/lib/mysql");
    let dst = temp.path().join("data/mysql");
    create_data_dir(&src);
    let before = checksums(&src);

    let (migrator, ctx) = migrator();
    let task = MigrationTask::new(MigrationKind::Data, &src, &dst).unwrap();
    let report = migrator.perform_migration(&ctx, &[task]).unwrap();

    assert!(!src.exists());
    assert_eq!(checksums(&dst), before);
    assert!(report.warnings.is_empty());

    migrator.revert(&ctx, &report).unwrap();
    assert_eq!(checksums(&src), before);
    assert!(!dst.exists());
}

#[test]
fn test_same_source_and_destination_is_not_a_task() {
    assert!(MigrationTask::new(MigrationKind::Data, "/var/lib/mysql", "/var/lib/mysql/").is_none());
    assert!(MigrationTask::new(MigrationKind::Logs, "/var/log/mysql", "/var/log/./mysql").is_none());
}

#[test]
fn test_destination_inside_source_is_refused() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("var/lib/mysql");
    create_data_dir(&src);

    let (migrator, ctx) = migrator();
    let task = MigrationTask::new(MigrationKind::Data, &src, src.join("nested")).unwrap();
    assert!(migrator.perform_migration(&ctx, &[task]).is_err());
    assert!(src.join("ibdata1").is_file());
    assert!(!src.join("nested").exists());
}

#[test]
fn test_configure_relocates_data_directory() {
    let layout = HostLayout::new();
    let before = checksums(&layout.data_dir);
    let (packages, services) = mysql_fakes();
    let (logger, _sink) = capture_logger();
    let host = layout.host(packages, services.clone(), logger.clone());

    let new_dir = layout.root.join("data/mysql");
    let mut config = sqlwarden::OperationConfig::default();
    config.assume_yes = true;
    config.backup.root = layout.backup_root.clone();
    config.layout.data_dir = Some(new_dir.clone());

    let result = run_configure(&host, &OperationContext::new(logger), &config);

    assert!(result.success, "{:?}", result.failure);
    assert!(!layout.data_dir.exists());
    assert_eq!(checksums(&new_dir), before);
    let rewritten = fs::read_to_string(&layout.option_file).unwrap();
    assert!(rewritten.contains(&format!("datadir = {}", new_dir.display())));
    assert!(rewritten.contains("port = 3306"));
    assert!(services.active("mysql"));
    assert!(result.backup_path.unwrap().join("config").read_dir().unwrap().count() >= 1);
}

#[test]
fn test_configure_rolls_back_when_service_fails_to_start() {
    let layout = HostLayout::new();
    let before = checksums(&layout.data_dir);
    let original_options = fs::read_to_string(&layout.option_file).unwrap();
    let (packages, _) = mysql_fakes();
    let services = Arc::new(FakeServiceManager::new().with_unit("mysql", true, true).failing_start());
    let (logger, _sink) = capture_logger();
    let host = layout.host(packages, services.clone(), logger.clone());

    let new_data = layout.root.join("data/mysql");
    let new_logs = layout.root.join("data/logs");
    let mut config = sqlwarden::OperationConfig::default();
    config.assume_yes = true;
    config.backup.enabled = false;
    config.layout.data_dir = Some(new_data.clone());
    config.layout.log_dir = Some(new_logs.clone());

    let result = run_configure(&host, &OperationContext::new(logger), &config);

    assert!(!result.success);
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.step, "start service");
    assert!(failure.rolled_back_cleanly(), "{:?}", failure.rollback_failures);

    assert_eq!(checksums(&layout.data_dir), before);
    assert!(layout.log_dir.join("error.log").is_file());
    assert!(layout.log_dir.join("error.log.1").is_file());
    assert!(!new_data.exists());
    assert!(!new_logs.join("error.log").exists());
    assert_eq!(fs::read_to_string(&layout.option_file).unwrap(), original_options);
    // The stop step's rollback brings the server back on the old layout
    assert!(services.active("mysql"));
}

#[test]
fn test_configure_refuses_protected_destination() {
    let layout = HostLayout::new();
    let (packages, services) = mysql_fakes();
    let (logger, _sink) = capture_logger();
    let host = layout.host(packages, services.clone(), logger.clone());

    let mut config = sqlwarden::OperationConfig::default();
    config.assume_yes = true;
    config.layout.data_dir = Some(PathBuf::from("/usr"));

    let result = run_configure(&host, &OperationContext::new(logger), &config);

    assert!(result.is_protected_path());
    assert!(layout.data_dir.join("ibdata1").is_file());
    assert!(services.calls().is_empty());
}
