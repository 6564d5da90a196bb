use std::ffi::OsStr;

use anyhow::{Result, bail};
use async_trait::async_trait;
use sysinfo::System;

use crate::config::ProtectionSection;
use crate::platform::{probe_command, run_command};

/// The antivirus service that must be off before a playbook runs.
#[async_trait]
pub trait ProtectionService: Send + Sync {
    /// Whether the scanning engine process is running.
    fn engine_running(&self) -> bool;

    /// Kills the engine process. True when nothing of it is left running.
    fn kill_engine(&self) -> bool;

    /// One graceful disable attempt.
    async fn disable(&self) -> Result<()>;

    /// Whether the user-facing protection toggles are all off.
    async fn toggles_ready(&self) -> bool;

    /// Whether only remnants of the service remain, so no reboot is needed.
    async fn remnants_only(&self) -> bool;
}

/// Windows Defender driven through the process table and configured commands.
#[derive(Debug, Clone)]
pub struct DefenderService {
    section: ProtectionSection,
}

impl DefenderService {
    pub fn new(section: ProtectionSection) -> Self {
        Self { section }
    }
}

fn name_matches(name: &OsStr, wanted: &str) -> bool {
    let name = name.to_string_lossy();
    name.eq_ignore_ascii_case(wanted)
        || name.eq_ignore_ascii_case(wanted.trim_end_matches(".exe"))
}

#[async_trait]
impl ProtectionService for DefenderService {
    fn engine_running(&self) -> bool {
        let sys = System::new_all();
        sys.processes()
            .values()
            .any(|p| name_matches(p.name(), &self.section.engine_process))
    }

    fn kill_engine(&self) -> bool {
        let sys = System::new_all();
        let mut killed = true;
        for process in sys
            .processes()
            .values()
            .filter(|p| name_matches(p.name(), &self.section.engine_process))
        {
            if !process.kill() {
                tracing::warn!(pid = %process.pid(), "could not kill protection engine");
                killed = false;
            }
        }
        killed
    }

    async fn disable(&self) -> Result<()> {
        match &self.section.disable_command {
            Some(line) => run_command(line).await,
            None => bail!("no protection disable command configured"),
        }
    }

    async fn toggles_ready(&self) -> bool {
        match &self.section.toggles_probe {
            Some(line) => probe_command(line).await,
            None => true,
        }
    }

    async fn remnants_only(&self) -> bool {
        match &self.section.remnants_probe {
            Some(line) => probe_command(line).await,
            None => false,
        }
    }
}
