// src/detect/client.rs

//! Live introspection through the server's own client

use crate::error::{Error, Result};
use crate::system::command::run;
use std::path::PathBuf;
use tracing::debug;

/// Reads server variables from a running instance
pub trait ServerClient: Send + Sync {
    /// Value of global variable `name` (e.g. `datadir`), or `None` when
    /// the server cannot be reached or the value is NULL
    fn query_variable(&self, name: &str) -> Result<Option<String>>;
}

/// Client that shells out to `mysql` (or `mariadb`) in batch mode
#[derive(Debug, Clone)]
pub struct MysqlClient {
    program: String,
    defaults_file: Option<PathBuf>,
}

impl Default for MysqlClient {
    fn default() -> Self {
        Self::new("mysql")
    }
}

impl MysqlClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            defaults_file: None,
        }
    }

    /// Credentials file passed as `--defaults-file`
    pub fn with_defaults_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.defaults_file = Some(path.into());
        self
    }
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ServerClient for MysqlClient {
    fn query_variable(&self, name: &str) -> Result<Option<String>> {
        if !is_variable_name(name) {
            return Err(Error::Validation(format!("invalid server variable name: {}", name)));
        }

        let defaults = self
            .defaults_file
            .as_ref()
            .map(|p| format!("--defaults-file={}", p.display()));
        let query = format!("SELECT @@GLOBAL.{}", name);

        let mut args: Vec<&str> = Vec::new();
        if let Some(defaults) = defaults.as_deref() {
            args.push(defaults);
        }
        args.extend(["-N", "-B", "-e", query.as_str()]);

        let output = match run(&self.program, &args) {
            Ok(output) => output,
            Err(e) => {
                debug!("{} unavailable: {}", self.program, e);
                return Ok(None);
            }
        };
        if !output.success() {
            debug!("Server not reachable for @@{}: {}", name, output.stderr.trim());
            return Ok(None);
        }

        let value = output.first_line();
        if value.is_empty() || value.eq_ignore_ascii_case("NULL") {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }
}
