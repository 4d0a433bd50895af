// src/context.rs

//! Per-operation execution context
//!
//! Carries the cooperative cancellation token, an optional progress
//! tracker and the logger into every step. Long-running work (tree
//! copies, archives) checks `check_cancelled` between files; the engine
//! imposes no timeout of its own.

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::progress::ProgressTracker;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Context passed to `Step::execute` and `Step::rollback`
#[derive(Clone, Default)]
pub struct OperationContext {
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn ProgressTracker>>,
    logger: Logger,
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("cancelled", &self.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

impl OperationContext {
    pub fn new(logger: Logger) -> Self {
        Self {
            cancel: None,
            progress: None,
            logger,
        }
    }

    /// Set the cancel token
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set the progress tracker
    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn progress(&self) -> Option<&Arc<dyn ProgressTracker>> {
        self.progress.as_ref()
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return `Error::Cancelled` if cancellation was requested
    pub fn check_cancelled(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(operation.to_string()))
        } else {
            Ok(())
        }
    }

    /// Update the progress message, if a tracker is attached
    pub fn report_message(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress.set_message(message);
        }
    }
}
