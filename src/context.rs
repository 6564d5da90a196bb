use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::TieredConfig;
use crate::elevation::{CommandLauncher, DefenderService, Launcher, ProtectionService};
use crate::error_log::ErrorLog;
use crate::platform::{HelperDriver, HiveManager, PrivilegeProbe, RegHives, ServiceDriver};
use crate::relay::RelayTiming;
use crate::state_machine::RetryPolicy;
use crate::ui::Console;

/// Everything a run needs, built once and passed by reference.
pub struct RunContext {
    pub config: TieredConfig,
    pub console: Console,
    pub error_log: ErrorLog,
    pub probe: Box<dyn PrivilegeProbe>,
    pub launcher: Box<dyn Launcher>,
    pub protection: Box<dyn ProtectionService>,
    pub driver: Box<dyn HelperDriver>,
    pub hives: Box<dyn HiveManager>,
    pub http: reqwest::Client,
    /// Global arguments repeated on every relaunch of this executable.
    pub child_args: Vec<String>,
}

impl RunContext {
    /// Wires the real OS-backed capabilities.
    pub fn production(
        config: TieredConfig,
        console: Console,
        probe: Box<dyn PrivilegeProbe>,
        child_args: Vec<String>,
    ) -> Result<Self> {
        let launcher = CommandLauncher::current_exe(&config.elevation)
            .context("could not locate the running executable")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.requirements.internet_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            error_log: ErrorLog::new(&config.logs_dir),
            probe,
            launcher: Box::new(launcher),
            protection: Box::new(DefenderService::new(config.protection.clone())),
            driver: Box::new(ServiceDriver::new(config.driver.clone())),
            hives: Box::new(RegHives::new(&config.registry)),
            http,
            child_args,
            console,
            config,
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.retry)
    }

    pub fn relay_timing(&self) -> RelayTiming {
        RelayTiming::from(&self.config.relay)
    }
}
