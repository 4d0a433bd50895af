// src/progress.rs

//! Progress reporting for long-running operations
//!
//! Tree copies move whole data directories while the server is offline,
//! so they report byte progress through a `ProgressTracker`. `LogProgress`
//! turns that into percentage milestones in the log; the CLI spinner in
//! `commands::progress` is the interactive implementation.

use crate::logging::Logger;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives progress from copies and step transitions
///
/// Implementations must be `Send + Sync`; the CLI spinner ticks on its own
/// thread while the pipeline reports into it.
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Advance by `amount` bytes
    fn increment(&self, amount: u64);

    /// Set the total amount of work; zero means unknown
    fn set_length(&self, length: u64);
}

/// Percentage of `position` over `length`, clamped to 100
pub fn percent(position: u64, length: u64) -> u64 {
    if length == 0 {
        return 100;
    }
    ((position.saturating_mul(100)) / length).min(100)
}

/// Logs one info record each time the completed percentage crosses a
/// milestone (every `step_percent` percent, 10 by default)
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    logger: Logger,
    position: AtomicU64,
    length: AtomicU64,
    last_milestone: AtomicU64,
    step_percent: u64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, length: u64, logger: Logger) -> Self {
        Self {
            name: name.into(),
            logger,
            position: AtomicU64::new(0),
            length: AtomicU64::new(length),
            last_milestone: AtomicU64::new(0),
            step_percent: 10,
        }
    }

    /// Change the milestone granularity
    pub fn with_step_percent(mut self, step: u64) -> Self {
        self.step_percent = step.clamp(1, 100);
        self
    }

    /// Bytes reported so far
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        self.logger.debug(format!("{}: {}", self.name, message));
    }

    fn increment(&self, amount: u64) {
        let new_pos = self.position.fetch_add(amount, Ordering::Relaxed) + amount;
        let length = self.length.load(Ordering::Relaxed);
        if length == 0 {
            return;
        }

        let milestone = percent(new_pos, length) / self.step_percent * self.step_percent;
        let previous = self.last_milestone.fetch_max(milestone, Ordering::Relaxed);
        if milestone > previous {
            self.logger.info(format!(
                "{}: {}% ({}/{} bytes)",
                self.name, milestone, new_pos, length
            ));
        }
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
        self.last_milestone.store(0, Ordering::Relaxed);
    }
}
