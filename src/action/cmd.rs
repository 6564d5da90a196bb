use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{Action, ActionError, ActionStatus, ErrorKind};

/// Runs a shell command line.
#[derive(Debug, Clone, Deserialize)]
pub struct CmdAction {
    pub command: String,

    /// When false the command is started and left running.
    #[serde(default = "default_wait")]
    pub wait: bool,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Exit codes that count as success.
    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i32>,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(skip)]
    completed: bool,

    #[serde(skip)]
    last_error: Option<String>,
}

fn default_wait() -> bool {
    true
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_weight() -> u32 {
    1
}

impl CmdAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            wait: default_wait(),
            timeout_secs: None,
            exit_codes: default_exit_codes(),
            weight: default_weight(),
            completed: false,
            last_error: None,
        }
    }

    /// Starts the command without waiting for it.
    pub fn detached(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn shell(&self) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        }
    }
}

#[async_trait]
impl Action for CmdAction {
    async fn run(&mut self) -> Result<(), ActionError> {
        if self.command.trim().is_empty() {
            return Err(ActionError::new(ErrorKind::Validation, "command is empty"));
        }

        let mut cmd = self.shell();
        cmd.stdin(Stdio::null());

        if !self.wait {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            cmd.spawn()
                .map_err(|e| ActionError::from(e).with_context(self.command.clone()))?;
            self.completed = true;
            return Ok(());
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| ActionError::from(e).with_context(self.command.clone()))?;

        let output = match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
                .await
                .map_err(|_| {
                    ActionError::new(
                        ErrorKind::Timeout,
                        format!("command did not finish within {secs}s"),
                    )
                    .with_context(self.command.clone())
                })??,
            None => child.wait_with_output().await?,
        };

        match output.status.code() {
            Some(code) if self.exit_codes.contains(&code) => {
                self.completed = true;
                self.last_error = None;
                Ok(())
            }
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let message = match code {
                    Some(code) => format!("exit code {code}: {stderr}"),
                    None => format!("terminated by signal: {stderr}"),
                };
                self.last_error = Some(message.clone());
                Err(ActionError::retryable(message).with_context(self.command.clone()))
            }
        }
    }

    // A command has no partial progress to roll back.
    fn reset_progress(&mut self) {}

    fn status(&self) -> ActionStatus {
        if self.completed {
            ActionStatus::Completed
        } else {
            ActionStatus::NotCompleted
        }
    }

    fn progress_weight(&self) -> u32 {
        self.weight
    }

    fn error_string(&self) -> String {
        match &self.last_error {
            Some(err) => format!("CmdAction failed to run command '{}': {err}", self.command),
            None => format!("CmdAction failed to run command '{}'", self.command),
        }
    }
}
