// src/commands/progress.rs
//! Terminal progress and confirmation for lifecycle operations

use indicatif::{ProgressBar, ProgressStyle};
use sqlwarden::Result;
use sqlwarden::pipeline::Confirm;
use sqlwarden::progress::ProgressTracker;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Spinner that switches to a byte bar once a length is known
pub struct OperationSpinner {
    bar: ProgressBar,
    finished: AtomicBool,
}

impl OperationSpinner {
    pub fn new(operation: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(operation.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            finished: AtomicBool::new(false),
        }
    }

    /// Run `f` with the spinner hidden
    pub fn suspend<T>(&self, f: impl FnOnce() -> T) -> T {
        self.bar.suspend(f)
    }

    pub fn clear(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.bar.finish_and_clear();
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:30.green/dim}] {bytes}/{total_bytes}")
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl ProgressTracker for OperationSpinner {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_length(&self, length: u64) {
        if length == 0 {
            self.bar.set_style(spinner_style());
        } else {
            self.bar.set_style(bar_style());
        }
        self.bar.set_position(0);
        self.bar.set_length(length);
    }
}

/// Asks on the terminal; declines when stdin is not interactive
pub struct TerminalConfirm {
    spinner: Arc<OperationSpinner>,
}

impl TerminalConfirm {
    pub fn new(spinner: Arc<OperationSpinner>) -> Self {
        Self { spinner }
    }
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        if !io::stdin().is_terminal() {
            tracing::warn!("stdin is not a terminal; pass --yes to run non-interactively");
            return Ok(false);
        }

        self.spinner.suspend(|| {
            let mut stdout = io::stdout();
            writeln!(stdout)?;
            write!(stdout, "{} [y/N] ", prompt)?;
            stdout.flush()?;

            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            Ok(parse_answer(&answer))
        })
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
