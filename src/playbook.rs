//! Loads a playbook directory into tasks.
//!
//! Layout:
//!
//! ```text
//! <playbook>/playbook.toml            name, requirements
//! <playbook>/Configuration/custom.toml  entry task file (or custom.json)
//! <playbook>/Configuration/...          task files named by `features`
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::action::ActionDef;
use crate::error::PlaybookError;
use crate::requirements::Requirement;
use crate::scheduler::{Privilege, Task};

pub const CONFIGURATION_DIR: &str = "Configuration";
const META_FILE: &str = "playbook.toml";
const ENTRY_FILES: [&str; 2] = ["custom.toml", "custom.json"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybookMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    title: String,

    #[serde(default)]
    priority: i32,

    #[serde(default)]
    privilege: Privilege,

    #[serde(default)]
    actions: Vec<ActionDef>,

    /// Further task files, relative to the configuration folder.
    #[serde(default)]
    features: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Playbook {
    pub path: PathBuf,
    pub meta: PlaybookMeta,
}

impl Playbook {
    pub fn load(dir: &Path) -> Result<Self, PlaybookError> {
        if !dir.is_dir() {
            return Err(PlaybookError::NotFound(dir.to_path_buf()));
        }

        let meta_path = dir.join(META_FILE);
        let mut meta: PlaybookMeta = if meta_path.exists() {
            toml::from_str(&fs::read_to_string(&meta_path)?)?
        } else {
            PlaybookMeta::default()
        };
        if meta.name.is_empty() {
            meta.name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        let config_dir = dir.join(CONFIGURATION_DIR);
        let empty = match fs::read_dir(&config_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        };
        if empty {
            return Err(PlaybookError::EmptyConfiguration(config_dir));
        }

        Ok(Self {
            path: dir.to_path_buf(),
            meta,
        })
    }

    pub fn configuration_dir(&self) -> PathBuf {
        self.path.join(CONFIGURATION_DIR)
    }

    pub fn requires(&self, requirement: Requirement) -> bool {
        self.meta.requirements.contains(&requirement)
    }

    /// Loads the entry task file and every feature it references.
    ///
    /// Tasks come out depth-first, parent before its features. Every file is
    /// attempted; all failures are returned together.
    pub fn load_tasks(&self) -> Result<Vec<Task>, PlaybookError> {
        let config_dir = self.configuration_dir();
        let entry = ENTRY_FILES
            .iter()
            .map(|name| config_dir.join(name))
            .find(|p| p.is_file())
            .ok_or_else(|| PlaybookError::Task {
                path: config_dir.clone(),
                message: "no custom.toml or custom.json entry file".to_string(),
            })?;

        let mut tasks = Vec::new();
        let mut errors = Vec::new();
        let mut visited = HashSet::new();
        collect(&config_dir, &entry, &mut tasks, &mut errors, &mut visited);

        match errors.len() {
            0 => Ok(tasks),
            1 => Err(errors.remove(0)),
            _ => Err(PlaybookError::Many(errors)),
        }
    }
}

fn collect(
    config_dir: &Path,
    path: &Path,
    tasks: &mut Vec<Task>,
    errors: &mut Vec<PlaybookError>,
    visited: &mut HashSet<PathBuf>,
) {
    let path = resolve(path);
    if !visited.insert(path.clone()) {
        tracing::debug!(path = %path.display(), "task file already loaded");
        return;
    }

    let file = match parse_task_file(&path) {
        Ok(file) => file,
        Err(e) => {
            errors.push(e);
            return;
        }
    };

    let TaskFile {
        title,
        priority,
        privilege,
        actions,
        features,
    } = file;
    tasks.push(Task {
        title,
        priority,
        privilege,
        actions: actions.into_iter().map(ActionDef::into_action).collect(),
    });

    for feature in features {
        collect(config_dir, &config_dir.join(feature), tasks, errors, visited);
    }
}

// A directory reference means its entry file.
fn resolve(path: &Path) -> PathBuf {
    if path.is_dir() {
        for name in ENTRY_FILES {
            let candidate = path.join(name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    path.to_path_buf()
}

fn parse_task_file(path: &Path) -> Result<TaskFile, PlaybookError> {
    let task_error = |message: String| PlaybookError::Task {
        path: path.to_path_buf(),
        message,
    };

    let text = fs::read_to_string(path).map_err(|e| task_error(e.to_string()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&text).map_err(|e| task_error(e.to_string()))
    } else {
        toml::from_str(&text).map_err(|e| task_error(e.to_string()))
    }
}
