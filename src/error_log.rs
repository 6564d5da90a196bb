//! Persistent error log.
//!
//! Every caught error is appended to `<logs_dir>/ErrorLog.txt` before the
//! caller decides how to recover, so the diagnosis survives a run that
//! carries on successfully.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

const SEPARATOR: &str = "============================================";

/// Append-only error log shared by every component of a run.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            path: logs_dir.join("ErrorLog.txt"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records one error. Writing the log never fails the caller; a log that
    /// cannot be written is reported through `tracing` instead.
    pub fn record(&self, message: &str, context: &str, label: &str) {
        tracing::error!(label, context, "{message}");

        if let Err(e) = self.append(message, context, label) {
            tracing::warn!(path = %self.path.display(), "could not write error log: {e}");
        }
    }

    fn append(&self, message: &str, context: &str, label: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "Title: {label}")?;
        writeln!(file, "Message: {message}")?;
        if !context.is_empty() {
            writeln!(file)?;
            writeln!(file, "Context: {context}")?;
        }
        writeln!(file)?;
        writeln!(file, "Date/Time: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "{SEPARATOR}")?;
        Ok(())
    }

    /// Number of entries written so far.
    #[cfg(test)]
    pub fn entries(&self) -> usize {
        fs::read_to_string(&self.path)
            .map(|s| s.lines().filter(|l| *l == SEPARATOR).count())
            .unwrap_or(0)
    }
}
