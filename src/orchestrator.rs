use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::action::{Action, CmdAction};
use crate::config::TieredConfig;
use crate::context::RunContext;
use crate::elevation::prepare_system;
use crate::error::{FatalError, PlaybookError};
use crate::playbook::Playbook;
use crate::requirements::{Requirement, internet_available, wait_for_toggles};
use crate::scheduler::{Elevate, Ledger, Privilege, RunSummary, Scheduler};
use crate::summary::tally_checklist;

/// Transcript and results files reset at the start of a fresh run.
pub const ADMIN_TRANSCRIPT: &str = "AdminOutput.txt";
pub const TI_TRANSCRIPT: &str = "TIOutput.txt";
pub const CHECKLIST: &str = "FileChecklist.txt";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Keep the ledger from an interrupted run.
    pub resume: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(RunSummary),
    /// Protection was removed and a reboot was requested. Run again afterwards.
    Rebooting,
}

#[derive(Debug, PartialEq, Eq)]
enum Preparation {
    Ready,
    Rebooting,
}

/// Drives one playbook run in the current session.
pub struct Orchestrator<'a> {
    ctx: &'a RunContext,
    playbook: Playbook,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a RunContext, playbook: Playbook, options: RunOptions) -> Self {
        Self {
            ctx,
            playbook,
            options,
        }
    }

    /// Prepare, schedule, tear down.
    ///
    /// Preparation and teardown happen only in the Admin session; an elevated
    /// child just runs its share of the tasks.
    pub async fn run(&self, elevator: &dyn Elevate) -> Result<RunOutcome, FatalError> {
        let ctx = self.ctx;
        let held = ctx.probe.current();
        tracing::info!(playbook = %self.playbook.meta.name, session = %held, "starting run");

        if held == Privilege::Admin {
            if self.prepare().await? == Preparation::Rebooting {
                return Ok(RunOutcome::Rebooting);
            }
            self.begin().await?;
        }

        let tasks = self.playbook.load_tasks().map_err(|e| {
            self.report_playbook_error(&e);
            FatalError::from(e)
        })?;
        let ledger = Ledger::load(&ctx.config.ledger_path)?;
        let mut scheduler = Scheduler::new(tasks, ledger, ctx.policy());
        if scheduler.tasks().is_empty() {
            return Err(FatalError::NoTasks);
        }

        if held == Privilege::Admin {
            ctx.console.status("Running tasks");
            ctx.console
                .start_progress(scheduler.pending_weight(Privilege::Admin));
        }
        let summary = scheduler.run(ctx, elevator).await?;
        tracing::info!(
            session = %held,
            executed = summary.executed.len(),
            delegated = summary.delegated.len(),
            skipped = summary.skipped.len(),
            failed_actions = summary.failed_actions,
            "scheduler pass finished"
        );

        if held == Privilege::Admin {
            self.finish(scheduler.into_ledger()).await;
        }
        Ok(RunOutcome::Finished(summary))
    }

    async fn prepare(&self) -> Result<Preparation, FatalError> {
        let ctx = self.ctx;
        ctx.console.status("Checking requirements");

        if self.playbook.requires(Requirement::Internet)
            && !internet_available(&ctx.http, &ctx.config.requirements.internet_probe_url).await
        {
            ctx.console.line("Internet must be connected to run this Playbook.");
        }

        if !self.playbook.requires(Requirement::DefenderDisabled)
            || !ctx.protection.engine_running()
        {
            return Ok(Preparation::Ready);
        }

        let section = &ctx.config.protection;
        let ready = wait_for_toggles(
            ctx.protection.as_ref(),
            &ctx.console,
            Duration::from_millis(section.toggle_poll_ms),
            Duration::from_secs(section.toggle_wait_secs),
        )
        .await;
        if !ready {
            return Err(FatalError::TogglesEnabled);
        }

        let remnants = ctx.protection.remnants_only().await;
        if remnants {
            ctx.console.line("The system must be prepared before continuing.");
        } else {
            ctx.console.line(
                "The system must be prepared before continuing. Your system will restart after preparation.",
            );
        }

        ctx.console.status("Preparing system");
        if let Err(e) = prepare_system(ctx).await {
            ctx.error_log
                .record(&e.to_string(), "", "Error preparing system.");
            return Err(FatalError::Preparation(e.to_string()));
        }
        ctx.console.line("Preparation Complete");

        if remnants {
            return Ok(Preparation::Ready);
        }

        ctx.console.line("Restarting system...");
        let mut reboot = CmdAction::new(section.reboot_command.clone()).detached();
        if let Err(e) = reboot.run().await {
            ctx.error_log.record(
                &e.to_string(),
                &section.reboot_command,
                "Could not restart the system.",
            );
        }
        Ok(Preparation::Rebooting)
    }

    // Fresh-run bookkeeping in the Admin session.
    async fn begin(&self) -> Result<(), FatalError> {
        let ctx = self.ctx;
        if !self.options.resume {
            Ledger::load(&ctx.config.ledger_path)?.clear()?;
        }
        remove_if_present(&ctx.config.logs_dir.join(CHECKLIST))?;

        if !ctx.driver.is_registered().await {
            ctx.console.line("Installing helper driver...");
            if let Err(e) = ctx.driver.install().await {
                ctx.error_log
                    .record(&format!("{e:#}"), "", "Error installing helper driver.");
            }
        }
        Ok(())
    }

    // End-of-run teardown. Errors are logged and never stop the teardown.
    async fn finish(&self, mut ledger: Ledger) {
        let ctx = self.ctx;

        match ctx.hives.release_all().await {
            Ok(count) => tracing::debug!(count, "registry hives released"),
            Err(e) => ctx
                .error_log
                .record(&format!("{e:#}"), "", "Error releasing registry hives."),
        }

        let checklist = ctx.config.logs_dir.join(CHECKLIST);
        match tally_checklist(&checklist) {
            Ok(tally) => ctx.console.line(&tally.summary_line()),
            Err(e) => ctx.error_log.record(
                &e.to_string(),
                &checklist.display().to_string(),
                "Error tallying file checklist.",
            ),
        }

        if ctx.driver.is_registered().await {
            ctx.console.line("Removing helper driver...");
            if let Err(e) = ctx.driver.uninstall().await {
                ctx.error_log
                    .record(&format!("{e:#}"), "", "Error removing helper driver.");
            }
        }

        if let Err(e) = ledger.clear() {
            ctx.error_log.record(
                &e.to_string(),
                &ledger.path().display().to_string(),
                "Error deleting task ledger.",
            );
        }

        ctx.console.line("");
        ctx.console.success("Playbook finished.");
    }

    fn report_playbook_error(&self, error: &PlaybookError) {
        let ctx = self.ctx;
        let errors = match error {
            PlaybookError::Many(errors) => errors.iter().collect(),
            single => vec![single],
        };
        for e in errors {
            ctx.console.line(&e.to_string());
            ctx.error_log.record(&e.to_string(), "", "Error adding tasks.");
        }
    }
}

/// Deletes last run's transcripts. Called before the console opens its own.
pub fn reset_transcripts(config: &TieredConfig) -> io::Result<()> {
    for name in [ADMIN_TRANSCRIPT, TI_TRANSCRIPT] {
        remove_if_present(&config.logs_dir.join(name))?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// One row of `tiered status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub title: String,
    pub priority: i32,
    pub privilege: Privilege,
    pub weight: u64,
    pub done: bool,
}

/// Ordered tasks of a playbook with their ledger state.
pub fn playbook_status(
    playbook: &Playbook,
    ledger_path: &Path,
) -> Result<Vec<TaskStatus>, FatalError> {
    let tasks = playbook.load_tasks()?;
    let ledger = Ledger::load(ledger_path)?;
    let scheduler = Scheduler::new(tasks, ledger, Default::default());
    Ok(scheduler
        .tasks()
        .iter()
        .map(|t| TaskStatus {
            title: t.title.clone(),
            priority: t.priority,
            privilege: t.privilege,
            weight: t.weight(),
            done: scheduler.ledger().contains(&t.title),
        })
        .collect())
}
