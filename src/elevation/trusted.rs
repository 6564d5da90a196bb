use std::path::PathBuf;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::FatalError;
use crate::relay::{self, RelayError, RelayReader};
use crate::scheduler::{Elevate, Privilege};

use super::launcher::LaunchMode;

/// Relaunches the playbook run as TrustedInstaller and relays its output.
#[derive(Debug, Clone)]
pub struct TrustedInstallerSession {
    playbook_dir: PathBuf,
}

impl TrustedInstallerSession {
    pub fn new(playbook_dir: PathBuf) -> Self {
        Self { playbook_dir }
    }

    fn child_args(&self, ctx: &RunContext, relay_name: &str) -> Vec<String> {
        let mut args = ctx.child_args.clone();
        args.extend([
            "run".to_string(),
            self.playbook_dir.display().to_string(),
            "--relay".to_string(),
            relay_name.to_string(),
            "--session".to_string(),
            "trusted-installer".to_string(),
        ]);
        args
    }
}

#[async_trait]
impl Elevate for TrustedInstallerSession {
    async fn elevate(&self, ctx: &RunContext, target: Privilege) -> Result<(), FatalError> {
        if target != Privilege::TrustedInstaller {
            return Ok(());
        }
        ctx.console.line("Relaunching as Trusted Installer!");

        let name = relay::session_name();
        let mut reader = RelayReader::create(&name, ctx.config.relay.region_size).map_err(|e| {
            ctx.error_log.record(
                &e.to_string(),
                &name,
                "Could not create memory data exchange region.",
            );
            FatalError::LaunchFailed(e.to_string())
        })?;

        let args = self.child_args(ctx, &name);
        let mut child = ctx
            .launcher
            .launch(LaunchMode::TrustedInstaller, &args)
            .map_err(|e| {
                ctx.error_log
                    .record(&e.to_string(), "", "Could not launch TrustedInstaller process.");
                FatalError::LaunchFailed(e.to_string())
            })?;

        match relay::forward(&mut reader, child.as_mut(), &ctx.console, &ctx.relay_timing()).await {
            Ok(code) => {
                if code != 0 {
                    ctx.error_log.record(
                        &format!("Exit code was {code}."),
                        "",
                        "TrustedInstaller process exited abnormally.",
                    );
                }
                tracing::info!(code, "TrustedInstaller session finished");
                Ok(())
            }
            Err(RelayError::HandshakeTimeout) => {
                ctx.error_log.record(
                    &RelayError::HandshakeTimeout.to_string(),
                    "",
                    "Error while attempting to sync with TrustedInstaller process.",
                );
                Err(FatalError::HandshakeTimeout)
            }
            Err(e) => {
                ctx.error_log
                    .record(&e.to_string(), "", "Lost TrustedInstaller output relay.");
                Err(FatalError::Relay(e.to_string()))
            }
        }
    }
}
