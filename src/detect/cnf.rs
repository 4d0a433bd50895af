// src/detect/cnf.rs

//! Server option file (`my.cnf`) reading and editing
//!
//! Only `[mysqld]`-class sections are considered. The scanner is
//! deliberately simple: `key = value` lines, comments stripped, quotes
//! removed, `$VAR`/`${VAR}` substitutions dropped. `!include` and
//! `!includedir` are followed, cycle-safe.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

const MAX_INCLUDE_DEPTH: usize = 4;

static SUBSTITUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{[^}]*\}|\$[A-Za-z_][A-Za-z0-9_]*").expect("valid substitution regex")
});

/// Whether a section header names a server section
pub fn is_server_section(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    matches!(name.as_str(), "mysqld" | "server" | "mariadb" | "mariadbd")
        || name.starts_with("mysqld-")
        || name.starts_with("mariadb-")
}

/// Normalize an option name: lowercase, `-` to `_`, no `loose_` prefix
pub fn normalize_key(key: &str) -> String {
    let key = key.trim().to_ascii_lowercase().replace('-', "_");
    match key.strip_prefix("loose_") {
        Some(rest) => rest.to_string(),
        None => key,
    }
}

/// Clean a raw option value
pub fn clean_value(raw: &str) -> String {
    let raw = raw.trim();

    let unquoted = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let inner = &raw[1..];
            match inner.find(q) {
                Some(end) => inner[..end].to_string(),
                None => inner.to_string(),
            }
        }
        _ => match raw.find('#') {
            Some(pos) => raw[..pos].to_string(),
            None => raw.to_string(),
        },
    };

    SUBSTITUTION.replace_all(&unquoted, "").trim().to_string()
}

/// One meaningful line of an option file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `key = value` (or bare `key`) inside a server section
    Set { key: String, value: String },
    Include(PathBuf),
    IncludeDir(PathBuf),
}

/// Parse option file content into directives, in file order
pub fn parse_directives(content: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    let mut in_server_section = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("!includedir") {
            directives.push(Directive::IncludeDir(PathBuf::from(rest.trim())));
            continue;
        }
        if let Some(rest) = line.strip_prefix("!include") {
            directives.push(Directive::Include(PathBuf::from(rest.trim())));
            continue;
        }

        if line.starts_with('[') {
            let name = line.trim_start_matches('[').split(']').next().unwrap_or("");
            in_server_section = is_server_section(name);
            continue;
        }

        if !in_server_section {
            continue;
        }

        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key, clean_value(value)),
            None => (line.split('#').next().unwrap_or(line), String::new()),
        };
        let key = normalize_key(key);
        if !key.is_empty() {
            directives.push(Directive::Set { key, value });
        }
    }

    directives
}

/// Whether the content has at least one server section
pub fn has_server_section(content: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim();
        line.starts_with('[')
            && is_server_section(line.trim_start_matches('[').split(']').next().unwrap_or(""))
    })
}

/// Server options merged from an option file and its includes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOptions {
    values: BTreeMap<String, String>,
    sources: Vec<PathBuf>,
}

impl ServerOptions {
    /// Value of an option (key is normalized first)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize_key(key))
    }

    /// Every file that contributed, in read order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Load an option file, following includes; later values override earlier ones
pub fn load_server_options(path: &Path) -> Result<ServerOptions> {
    let mut options = ServerOptions::default();
    let mut visited = HashSet::new();
    load_into(path, &mut options, &mut visited, 0)?;
    Ok(options)
}

fn load_into(
    path: &Path,
    options: &mut ServerOptions,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<()> {
    let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(key) {
        debug!("Skipping already-read option file {}", path.display());
        return Ok(());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("cannot read {}: {}", path.display(), e)))?;
    options.sources.push(path.to_path_buf());
    let base = path.parent().unwrap_or(Path::new("/"));

    for directive in parse_directives(&content) {
        match directive {
            Directive::Set { key, value } => {
                options.values.insert(key, value);
            }
            Directive::Include(file) if depth < MAX_INCLUDE_DEPTH => {
                let file = base.join(file);
                if file.is_file() {
                    load_into(&file, options, visited, depth + 1)?;
                }
            }
            Directive::IncludeDir(dir) if depth < MAX_INCLUDE_DEPTH => {
                for file in included_files(&base.join(dir)) {
                    load_into(&file, options, visited, depth + 1)?;
                }
            }
            _ => debug!("Include depth limit reached in {}", path.display()),
        }
    }

    Ok(())
}

/// `*.cnf` files of an `!includedir`, sorted by name
fn included_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "cnf"))
        .collect();
    files.sort();
    files
}

/// Set options inside the server section of an option file
///
/// Existing occurrences in server sections are replaced in place; options
/// not present yet are inserted right after the first server section
/// header (a `[mysqld]` section is appended when there is none). All other
/// lines are preserved.
pub fn rewrite_directives(content: &str, updates: &[(String, String)]) -> String {
    let mut written: HashSet<String> = HashSet::new();
    let mut lines: Vec<String> = Vec::new();
    let mut in_server_section = false;
    let mut first_header: Option<usize> = None;

    let lookup = |key: &str| {
        updates
            .iter()
            .find(|(k, _)| normalize_key(k) == key)
            .map(|(k, v)| (k.clone(), v.clone()))
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            let name = trimmed.trim_start_matches('[').split(']').next().unwrap_or("");
            in_server_section = is_server_section(name);
            if in_server_section && first_header.is_none() {
                first_header = Some(lines.len());
            }
            lines.push(line.to_string());
            continue;
        }

        if in_server_section && !trimmed.starts_with('#') && !trimmed.starts_with(';') {
            let raw_key = trimmed.split('=').next().unwrap_or("");
            if let Some((key, value)) = lookup(&normalize_key(raw_key)) {
                if !raw_key.trim().is_empty() {
                    lines.push(format!("{} = {}", key, value));
                    written.insert(normalize_key(&key));
                    continue;
                }
            }
        }
        lines.push(line.to_string());
    }

    let missing: Vec<String> = updates
        .iter()
        .filter(|(k, _)| !written.contains(&normalize_key(k)))
        .map(|(k, v)| format!("{} = {}", k, v))
        .collect();

    if !missing.is_empty() {
        match first_header {
            Some(index) => {
                for (offset, line) in missing.into_iter().enumerate() {
                    lines.insert(index + 1 + offset, line);
                }
            }
            None => {
                if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                    lines.push(String::new());
                }
                lines.push("[mysqld]".to_string());
                lines.extend(missing);
            }
        }
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}
