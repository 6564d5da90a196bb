use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Privilege a task needs. Ordered: `TrustedInstaller` is above `Admin`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    #[default]
    #[serde(alias = "Admin")]
    Admin,
    #[serde(alias = "TrustedInstaller", alias = "trusted_installer")]
    TrustedInstaller,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::Admin => write!(f, "Admin"),
            Privilege::TrustedInstaller => write!(f, "TrustedInstaller"),
        }
    }
}

/// What the scheduler does with a task, given the privilege it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Run,
    /// Needs a higher level: delegate to an elevated child.
    Elevate,
    /// Below the held level: left for the parent.
    Skip,
}

pub fn gate(required: Privilege, held: Privilege) -> Gate {
    match required.cmp(&held) {
        Ordering::Equal => Gate::Run,
        Ordering::Greater => Gate::Elevate,
        Ordering::Less => Gate::Skip,
    }
}

/// A titled, prioritized, privilege-tagged group of actions.
pub struct Task {
    pub title: String,
    pub priority: i32,
    pub privilege: Privilege,
    pub actions: Vec<Box<dyn Action>>,
}

impl Task {
    pub fn new(title: impl Into<String>, privilege: Privilege) -> Self {
        Self {
            title: title.into(),
            priority: 0,
            privilege,
            actions: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[cfg(test)]
    pub fn with_action(mut self, action: Box<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    /// Sum of the progress weights of every action.
    pub fn weight(&self) -> u64 {
        self.actions
            .iter()
            .map(|a| u64::from(a.progress_weight()))
            .sum()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("title", &self.title)
            .field("priority", &self.priority)
            .field("privilege", &self.privilege)
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Orders tasks by ascending priority.
///
/// The list is left untouched when every task shares one priority. The sort
/// is stable, so equal priorities keep their load order.
pub fn order_tasks(tasks: &mut [Task]) {
    let Some(first) = tasks.first().map(|t| t.priority) else {
        return;
    };
    if tasks.iter().all(|t| t.priority == first) {
        return;
    }
    tasks.sort_by_key(|t| t.priority);
}
