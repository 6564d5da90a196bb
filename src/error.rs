use std::path::PathBuf;

use thiserror::Error;

/// Exit code used for every process-fatal error.
pub const EXIT_FATAL: i32 = -1;

/// Errors that end the whole run. Anything below this level is logged and
/// the run moves on.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Could not launch TrustedInstaller process: {0}")]
    LaunchFailed(String),

    #[error("Could not initialize memory data exchange.")]
    HandshakeTimeout,

    #[error("Lost TrustedInstaller output relay: {0}")]
    Relay(String),

    #[error("Error preparing system: {0}")]
    Preparation(String),

    #[error("Security toggles are still enabled.")]
    TogglesEnabled,

    #[error("Error adding tasks.")]
    Playbook(#[from] PlaybookError),

    #[error("Couldn't find any tasks.")]
    NoTasks,

    #[error("Could not reset run state: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("No playbook found at {0}")]
    NotFound(PathBuf),

    #[error("Configuration folder is empty: {0}")]
    EmptyConfiguration(PathBuf),

    #[error("Error adding tasks in {path}: {message}")]
    Task { path: PathBuf, message: String },

    #[error("{} task file(s) failed to load", .0.len())]
    Many(Vec<PlaybookError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
