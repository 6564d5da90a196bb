//! Operating-system capabilities behind small seams.
//!
//! Each trait has one production implementation here and a fake in the
//! `testing` module, so the Admin and TrustedInstaller branches can be
//! exercised without touching the real machine.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use crate::action::{Action, CmdAction};
use crate::config::{DriverSection, RegistrySection};
use crate::scheduler::Privilege;

/// Group SID present in a TrustedInstaller token.
pub const TRUSTED_INSTALLER_SID: &str =
    "S-1-5-80-956008885-3418522649-1831038044-1853292631-2271478464";

const COMMAND_TIMEOUT_SECS: u64 = 120;

/// Reports the privilege level the current process holds.
pub trait PrivilegeProbe: Send + Sync {
    fn current(&self) -> Privilege;
}

/// Reads the process token once at startup.
#[derive(Debug, Clone, Copy)]
pub struct TokenProbe {
    held: Privilege,
}

impl TokenProbe {
    /// Inspects the token, falling back to `hint` (the `--session` the parent
    /// passed) when the token cannot be queried.
    pub fn detect(hint: Privilege) -> Self {
        let held = match token_has_trusted_installer() {
            Some(true) => Privilege::TrustedInstaller,
            Some(false) => Privilege::Admin,
            None => hint,
        };
        tracing::debug!(?held, ?hint, "privilege detected");
        Self { held }
    }
}

impl PrivilegeProbe for TokenProbe {
    fn current(&self) -> Privilege {
        self.held
    }
}

#[cfg(windows)]
fn token_has_trusted_installer() -> Option<bool> {
    let output = std::process::Command::new("whoami")
        .arg("/groups")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).contains(TRUSTED_INSTALLER_SID))
}

#[cfg(not(windows))]
fn token_has_trusted_installer() -> Option<bool> {
    None
}

/// Whether this process runs with administrator rights.
#[cfg(unix)]
pub fn is_administrator() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

/// Whether this process runs with administrator rights.
#[cfg(windows)]
pub fn is_administrator() -> bool {
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Runs a configured shell command line to completion.
pub async fn run_command(line: &str) -> Result<()> {
    let mut cmd = CmdAction::new(line).with_timeout(COMMAND_TIMEOUT_SECS);
    cmd.run()
        .await
        .with_context(|| format!("command failed: {line}"))
}

/// True when the command line exits successfully.
pub async fn probe_command(line: &str) -> bool {
    match run_command(line).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("probe failed: {e:#}");
            false
        }
    }
}

/// Kernel-mode helper driver installed for the duration of a run.
#[async_trait]
pub trait HelperDriver: Send + Sync {
    async fn is_registered(&self) -> bool;
    async fn install(&self) -> Result<()>;
    async fn uninstall(&self) -> Result<()>;
}

/// Driver managed as a Windows service through configured commands.
#[derive(Debug, Clone)]
pub struct ServiceDriver {
    section: DriverSection,
}

impl ServiceDriver {
    pub fn new(section: DriverSection) -> Self {
        Self { section }
    }

    fn query_line(&self) -> Option<String> {
        if let Some(line) = &self.section.query_command {
            return Some(line.clone());
        }
        if cfg!(windows) {
            Some(format!("sc query \"{}\"", self.section.service_name))
        } else {
            None
        }
    }
}

#[async_trait]
impl HelperDriver for ServiceDriver {
    async fn is_registered(&self) -> bool {
        match self.query_line() {
            Some(line) => probe_command(&line).await,
            None => false,
        }
    }

    async fn install(&self) -> Result<()> {
        match &self.section.install_command {
            Some(line) => run_command(line).await,
            None => {
                tracing::debug!(service = %self.section.service_name, "no driver install command");
                Ok(())
            }
        }
    }

    async fn uninstall(&self) -> Result<()> {
        match &self.section.uninstall_command {
            Some(line) => run_command(line).await,
            None => Ok(()),
        }
    }
}

/// Per-user registry hives loaded during a run.
#[async_trait]
pub trait HiveManager: Send + Sync {
    /// Unloads every hive, returning how many were released.
    async fn release_all(&self) -> Result<usize>;
}

/// Unloads hives with `reg unload`.
#[derive(Debug, Clone, Default)]
pub struct RegHives {
    keys: Vec<String>,
}

impl RegHives {
    pub fn new(section: &RegistrySection) -> Self {
        Self {
            keys: section.user_hives.clone(),
        }
    }
}

#[async_trait]
impl HiveManager for RegHives {
    async fn release_all(&self) -> Result<usize> {
        let mut released = 0;
        let mut failed = Vec::new();
        for key in &self.keys {
            match run_command(&format!("reg unload \"{key}\"")).await {
                Ok(()) => released += 1,
                Err(e) => {
                    tracing::warn!("could not unload {key}: {e:#}");
                    failed.push(key.as_str());
                }
            }
        }
        if !failed.is_empty() {
            bail!("could not unload hives: {}", failed.join(", "));
        }
        Ok(released)
    }
}
