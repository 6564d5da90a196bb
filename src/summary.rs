//! Tally of the file-deletion results log written by actions.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Counts of `Deleted: True` and `Deleted: False` lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChecklistTally {
    pub deleted: usize,
    pub failed: usize,
}

impl ChecklistTally {
    pub fn summary_line(&self) -> String {
        format!(
            "{} files were deleted successfully. {} files couldn't be deleted.",
            self.deleted, self.failed
        )
    }
}

/// Counts results in `path` and appends the summary line to it.
///
/// A missing log tallies to zero and is not created.
pub fn tally_checklist(path: &Path) -> io::Result<ChecklistTally> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ChecklistTally::default()),
        Err(e) => return Err(e),
    };

    let mut tally = ChecklistTally::default();
    for line in text.lines().map(str::trim) {
        match line {
            "Deleted: True" => tally.deleted += 1,
            "Deleted: False" => tally.failed += 1,
            _ => {}
        }
    }

    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{}", tally.summary_line())?;
    Ok(tally)
}
