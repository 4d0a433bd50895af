// tests/backup.rs

//! Backup creation and restore tests.

mod common;

use common::{capture_logger, create_data_dir};
use sqlwarden::backup::{ARCHIVE_NAME, BACKUP_PREFIX, sha256_file};
use sqlwarden::system::HostFilesystem;
use sqlwarden::{BackupEngine, BackupManifest, InstallationSnapshot, OperationContext};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn engine() -> (BackupEngine, OperationContext) {
    let (logger, _sink) = capture_logger();
    (
        BackupEngine::new(Arc::new(HostFilesystem::new(logger.clone())), logger.clone()),
        OperationContext::new(logger),
    )
}

fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().display().to_string(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[test]
fn test_backup_and_restore_data() {
    let temp = tempfile::tempdir().unwrap();
    let data = temp.path().join("var/lib/mysql");
    create_data_dir(&data);
    let etc = temp.path().join("etc");
    fs::create_dir_all(etc.join("mysql")).unwrap();
    fs::create_dir_all(etc.join("my.cnf.d")).unwrap();
    fs::write(etc.join("mysql/server.cnf"), "[mysqld]\ndatadir = /a\n").unwrap();
    fs::write(etc.join("my.cnf.d/server.cnf"), "[mysqld]\nport = 3307\n").unwrap();

    let snapshot = InstallationSnapshot::builder("mysql-server", "8.0.36")
        .data_dir(&data)
        .config_file(etc.join("mysql/server.cnf"))
        .config_file(etc.join("my.cnf.d/server.cnf"))
        .build();

    let (engine, ctx) = engine();
    let root = temp.path().join("backups/sqlwarden");
    let outcome = engine.backup(&ctx, &snapshot, &root).unwrap();

    let name = outcome.path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with(BACKUP_PREFIX));
    let archive = outcome.archive_path.clone().unwrap();
    assert_eq!(archive, outcome.path.join(ARCHIVE_NAME));
    assert_eq!(outcome.archive_size, fs::metadata(&archive).unwrap().len());

    let manifest = BackupManifest::load(&outcome.path).unwrap();
    assert_eq!(manifest.package_name, "mysql-server");
    assert_eq!(manifest.version, "8.0.36");
    assert_eq!(manifest.data_dir.as_deref(), Some(data.as_path()));
    assert_eq!(manifest.archive_sha256, Some(sha256_file(&archive).unwrap()));
    assert_eq!(manifest.config_files, outcome.config_files);

    // Same file name from two directories is stored twice
    assert_eq!(outcome.config_files.len(), 2);
    assert_ne!(outcome.config_files[0].stored_as, outcome.config_files[1].stored_as);
    for saved in &outcome.config_files {
        assert_eq!(
            fs::read(outcome.path.join(&saved.stored_as)).unwrap(),
            fs::read(&saved.source).unwrap()
        );
    }

    let restored = temp.path().join("restore/mysql");
    engine.restore_data(&outcome.path, &restored).unwrap();
    assert_eq!(read_tree(&restored), read_tree(&data));
}

#[test]
fn test_restore_config_files() {
    let temp = tempfile::tempdir().unwrap();
    let cnf = temp.path().join("etc/my.cnf");
    fs::create_dir_all(cnf.parent().unwrap()).unwrap();
    fs::write(&cnf, "[mysqld]\nuser = mysql\n").unwrap();
    let snapshot = InstallationSnapshot::builder("mariadb-server", "10.11.6")
        .data_dir(temp.path().join("missing/mysql"))
        .config_file(&cnf)
        .build();

    let (engine, ctx) = engine();
    let outcome = engine.backup(&ctx, &snapshot, &temp.path().join("backups/x")).unwrap();
    assert!(outcome.archive_path.is_none(), "no data directory to archive");

    fs::remove_file(&cnf).unwrap();
    assert_eq!(engine.restore_config_files(&outcome.path).unwrap(), 1);
    assert_eq!(fs::read_to_string(&cnf).unwrap(), "[mysqld]\nuser = mysql\n");
}

#[test]
fn test_backups_never_overwrite_each_other() {
    let temp = tempfile::tempdir().unwrap();
    let data = temp.path().join("var/lib/mysql");
    create_data_dir(&data);
    let snapshot = InstallationSnapshot::builder("mysql-server", "8.0.36").data_dir(&data).build();

    let (engine, ctx) = engine();
    let root = temp.path().join("backups/y");
    let first = engine.backup(&ctx, &snapshot, &root).unwrap();
    let second = engine.backup(&ctx, &snapshot, &root).unwrap();
    assert_ne!(first.path, second.path);
    assert!(first.path.join(ARCHIVE_NAME).is_file());
    assert!(second.path.join(ARCHIVE_NAME).is_file());
}

#[test]
fn test_backup_requires_installation() {
    let temp = tempfile::tempdir().unwrap();
    let (engine, ctx) = engine();
    let err = engine
        .backup(&ctx, &InstallationSnapshot::not_installed(), &temp.path().join("b/c"))
        .unwrap_err();
    assert!(matches!(err, sqlwarden::Error::Backup(_)));
}
