// src/heuristics.rs

//! File-name heuristics for server data and log files
//!
//! Detection, migration and the safety validator all need to tell data
//! files from log files. The rules live here once.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Entries whose presence marks a directory as a server data directory.
/// `mysql` is the system schema directory.
pub const SERVER_ARTIFACTS: &[&str] = &[
    "mysql",
    "ibdata1",
    "mysql.ibd",
    "auto.cnf",
    "aria_log_control",
    "ib_logfile0",
    "undo_001",
];

/// Entries that must survive a data directory migration when present in the source
pub const CRITICAL_FILES: &[&str] = &["mysql", "ibdata1", "mysql.ibd", "auto.cnf"];

/// Name of the system schema directory inside a data directory
pub const SYSTEM_SCHEMA_DIR: &str = "mysql";

/// Extensions used by storage engines for table data
const DATA_EXTENSIONS: &[&str] = &[
    "ibd", "frm", "myd", "myi", "mad", "mai", "sdi", "csv", "csm", "trg", "trn", "par", "arz",
];

/// `<base>-bin.000123`, `<base>-bin.index`, `<base>-relay-bin.000002`
static BINLOG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+-(bin|relay-bin)\.(\d{6,}|index)$").expect("valid binlog regex")
});

/// `error.log`, `host.err`, `mysqld.log.1`, `slow.log.2.gz`
static ROTATED_LOG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(log|err)(\.\d+)?(\.gz)?$").expect("valid log regex")
});

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// True for InnoDB redo logs, which are data despite their names
fn is_redo_log(name: &str) -> bool {
    name.starts_with("ib_logfile") || name.starts_with("#ib_redo")
}

/// Whether `path` names a server log file (error, general, slow, binary or relay log)
pub fn is_log_file(path: &Path) -> bool {
    let Some(name) = file_name(path) else {
        return false;
    };
    if is_redo_log(name) {
        return false;
    }
    BINLOG_NAME.is_match(name) || ROTATED_LOG_NAME.is_match(name)
}

/// Whether `path` names a binary or relay log file
///
/// With a `basename` (the `log_bin` base, e.g. `mysql-bin`) only that
/// series matches: `mysql-bin.000001`, `mysql-bin.index`.
pub fn is_binlog_file(path: &Path, basename: Option<&str>) -> bool {
    let Some(name) = file_name(path) else {
        return false;
    };
    match basename {
        Some(base) => match name.strip_prefix(base).and_then(|rest| rest.strip_prefix('.')) {
            Some(suffix) => {
                suffix == "index" || (suffix.len() >= 6 && suffix.chars().all(|c| c.is_ascii_digit()))
            }
            None => false,
        },
        None => BINLOG_NAME.is_match(name),
    }
}

/// Whether `path` names a storage engine data file
pub fn is_data_file(path: &Path) -> bool {
    let Some(name) = file_name(path) else {
        return false;
    };
    if name == "db.opt" || name.starts_with("ibdata") || is_redo_log(name) {
        return true;
    }
    if name.starts_with("undo_") || name.starts_with("ibtmp") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| DATA_EXTENSIONS.iter().any(|d| d.eq_ignore_ascii_case(ext)))
}

/// Whether `dir` directly contains at least one data file
///
/// Used to avoid descending into schema directories when only logs are
/// being relocated.
pub fn is_data_directory(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|entry| {
        entry.file_type().is_ok_and(|t| t.is_file()) && is_data_file(&entry.path())
    })
}

/// Whether `dir` contains any of the recognizable server artifacts
pub fn has_server_artifacts(dir: &Path) -> bool {
    SERVER_ARTIFACTS
        .iter()
        .any(|name| fs::symlink_metadata(dir.join(name)).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p(name: &str) -> PathBuf {
        PathBuf::from("/var/log/mysql").join(name)
    }

    #[test]
    fn test_log_files() {
        assert!(is_log_file(&p("error.log")));
        assert!(is_log_file(&p("host.err")));
        assert!(is_log_file(&p("mysql-slow.log")));
        assert!(is_log_file(&p("error.log.1")));
        assert!(is_log_file(&p("error.log.3.gz")));
        assert!(is_log_file(&p("mysql-bin.000042")));
        assert!(is_log_file(&p("mysql-bin.index")));
        assert!(is_log_file(&p("host-relay-bin.000002")));
    }

    #[test]
    fn test_non_log_files() {
        assert!(!is_log_file(&p("ib_logfile0")));
        assert!(!is_log_file(&p("#ib_redo12")));
        assert!(!is_log_file(&p("ibdata1")));
        assert!(!is_log_file(&p("users.ibd")));
        assert!(!is_log_file(&p("logrotate.conf")));
    }

    #[test]
    fn test_binlog_with_basename() {
        assert!(is_binlog_file(&p("mysql-bin.000001"), Some("mysql-bin")));
        assert!(is_binlog_file(&p("mysql-bin.index"), Some("mysql-bin")));
        assert!(!is_binlog_file(&p("other-bin.000001"), Some("mysql-bin")));
        assert!(!is_binlog_file(&p("mysql-bin.01"), Some("mysql-bin")));
        assert!(is_binlog_file(&p("other-bin.000001"), None));
        assert!(!is_binlog_file(&p("error.log"), None));
    }

    #[test]
    fn test_data_files() {
        assert!(is_data_file(&p("users.ibd")));
        assert!(is_data_file(&p("users.MYD")));
        assert!(is_data_file(&p("users.frm")));
        assert!(is_data_file(&p("db.opt")));
        assert!(is_data_file(&p("ibdata1")));
        assert!(is_data_file(&p("undo_002")));
        assert!(!is_data_file(&p("error.log")));
        assert!(!is_data_file(&p("auto.cnf")));
    }

    #[test]
    fn test_data_directory_detection() {
        let temp = tempfile::tempdir().unwrap();
        let schema = temp.path().join("appdb");
        fs::create_dir(&schema).unwrap();
        assert!(!is_data_directory(&schema));
        fs::write(schema.join("orders.ibd"), b"x").unwrap();
        assert!(is_data_directory(&schema));
    }

    #[test]
    fn test_server_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        assert!(!has_server_artifacts(temp.path()));
        fs::create_dir(temp.path().join(SYSTEM_SCHEMA_DIR)).unwrap();
        assert!(has_server_artifacts(temp.path()));
    }
}
