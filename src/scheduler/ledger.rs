use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only record of completed task titles, one per line.
///
/// The file outlives the process so a run interrupted by a reboot, or a
/// parent re-reading after an elevated child, skips finished tasks.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    titles: Vec<String>,
}

impl Ledger {
    /// Loads the ledger. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let titles = read_titles(&path)?;
        Ok(Self { path, titles })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.iter().any(|t| t == title)
    }

    /// Re-reads titles appended by another process.
    pub fn refresh(&mut self) -> io::Result<()> {
        self.titles = read_titles(&self.path)?;
        Ok(())
    }

    /// Appends `title` unless already recorded. Returns whether it was added.
    pub fn record(&mut self, title: &str) -> io::Result<bool> {
        if self.contains(title) {
            return Ok(false);
        }
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{title}")?;
        self.titles.push(title.to_string());
        Ok(true)
    }

    /// Deletes the ledger file and forgets every title.
    pub fn clear(&mut self) -> io::Result<()> {
        self.titles.clear();
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn read_titles(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
