//! The contract every unit of system modification satisfies.
//!
//! Concrete actions mutate live system state (registry, files, services), so
//! they must be safe to invoke again after [`Action::reset_progress`].

mod cmd;

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use cmd::CmdAction;

/// Completion state reported by an action after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Completed,
    NotCompleted,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Completed => write!(f, "Completed"),
            ActionStatus::NotCompleted => write!(f, "NotCompleted"),
        }
    }
}

/// Classifies an action failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or definition; repeating cannot help.
    Validation,
    Permission,
    UnauthorizedAccess,
    Timeout,
    /// Anything else, assumed transient.
    Other,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Other)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::UnauthorizedAccess => write!(f, "unauthorized access"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Failure raised by [`Action::run`].
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct ActionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Where the failure happened (path, key, command), if known.
    pub context: Option<String>,
}

impl ActionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// OS code for a denied access check on an existing object.
#[cfg(windows)]
const ACCESS_DENIED: i32 = 5;
#[cfg(unix)]
const ACCESS_DENIED: i32 = libc::EACCES;

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match e.kind() {
            _ if e.raw_os_error() == Some(ACCESS_DENIED) => ErrorKind::UnauthorizedAccess,
            Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,
            Io::PermissionDenied => ErrorKind::Permission,
            Io::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Other,
        };
        Self::new(kind, e.to_string())
    }
}

/// A single privileged unit of work.
#[async_trait]
pub trait Action: Send + Sync {
    /// Performs one attempt.
    async fn run(&mut self) -> Result<(), ActionError>;

    /// Clears per-attempt progress. Called after every attempt.
    fn reset_progress(&mut self);

    fn status(&self) -> ActionStatus;

    fn progress_weight(&self) -> u32;

    /// Human-readable description of what failed, used in markers and logs.
    fn error_string(&self) -> String;
}

/// Serialized form of the shipped action variants.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDef {
    Cmd(CmdAction),
}

impl ActionDef {
    pub fn into_action(self) -> Box<dyn Action> {
        match self {
            ActionDef::Cmd(cmd) => Box::new(cmd),
        }
    }
}
