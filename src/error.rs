// src/error.rs

//! Error types for sqlwarden operations
//!
//! The taxonomy follows the pipeline's needs: validation failures happen
//! before anything is touched, execution failures may leave partial
//! changes behind and trigger rollback, and protected path refusals are
//! always fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by detection, validation, migration, backup and the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// A precondition was not met; nothing was changed
    #[error("validation failed: {0}")]
    Validation(String),

    /// A step changed system state before failing
    #[error("execution failed: {0}")]
    Execution(String),

    /// A compensating action failed
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// The safety validator refused to target a path
    #[error("refusing to touch protected path {path}: {reason}")]
    ProtectedPath { path: PathBuf, reason: String },

    /// An external tool could not be run or exited unsuccessfully
    #[error("command `{program}` failed: {message}")]
    Command { program: String, message: String },

    /// Directory migration failed
    #[error("migration of {kind} directory failed: {message}")]
    Migration { kind: String, message: String },

    /// Backup creation failed
    #[error("backup failed: {0}")]
    Backup(String),

    /// Configuration file could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input (config files, tool output)
    #[error("parse error: {0}")]
    Parse(String),

    /// Something expected was not there
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was cancelled (by token or by the operator)
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory walk error
    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a protected path error
    pub fn protected(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProtectedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build a command error
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// True for safety validator refusals
    pub fn is_protected_path(&self) -> bool {
        matches!(self, Self::ProtectedPath { .. })
    }

    /// True when the error happened before any side effect
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ProtectedPath { .. })
    }

    /// True when the operator (or a cancel token) stopped the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
