//! Privilege-aware task scheduling.
//!
//! Tasks run in priority order. Each one is checked against the Completion
//! Ledger and against the privilege this process holds: equal runs here,
//! higher is delegated to an elevated child, lower is left to the parent.

mod ledger;
mod task;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::FatalError;
use crate::executor;
use crate::state_machine::RetryPolicy;

pub use ledger::Ledger;
pub use task::{Gate, Privilege, Task, gate, order_tasks};

/// Runs the remaining playbook in a process holding `target`.
///
/// Returns once that process has finished. Failing to start or synchronize
/// with it is fatal.
#[async_trait]
pub trait Elevate: Send + Sync {
    async fn elevate(&self, ctx: &RunContext, target: Privilege) -> Result<(), FatalError>;
}

/// What happened to each task during one scheduler run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub delegated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed_actions: usize,
}

pub struct Scheduler {
    tasks: Vec<Task>,
    ledger: Ledger,
    policy: RetryPolicy,
}

impl Scheduler {
    /// Drops tasks without actions and orders the rest.
    pub fn new(mut tasks: Vec<Task>, ledger: Ledger, policy: RetryPolicy) -> Self {
        tasks.retain(|t| !t.actions.is_empty());
        order_tasks(&mut tasks);
        Self {
            tasks,
            ledger,
            policy,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Total progress weight of the tasks still to run here.
    pub fn pending_weight(&self, held: Privilege) -> u64 {
        self.tasks
            .iter()
            .filter(|t| t.privilege >= held && !self.ledger.contains(&t.title))
            .map(Task::weight)
            .sum()
    }

    /// Walks the task list once.
    ///
    /// Per-task errors are logged and the walk continues. Only a failed
    /// elevation stops it.
    pub async fn run(
        &mut self,
        ctx: &RunContext,
        elevator: &dyn Elevate,
    ) -> Result<RunSummary, FatalError> {
        let held = ctx.probe.current();
        let mut previous = Privilege::Admin;
        let mut summary = RunSummary::default();

        for task in self.tasks.iter_mut() {
            if self.ledger.contains(&task.title) {
                tracing::debug!(task = %task.title, "already in ledger");
                summary.skipped.push(task.title.clone());
                continue;
            }

            match gate(task.privilege, held) {
                Gate::Skip => {
                    summary.skipped.push(task.title.clone());
                }
                Gate::Elevate => {
                    // The previous delegation already ran this block.
                    if previous == task.privilege {
                        summary.skipped.push(task.title.clone());
                        continue;
                    }
                    tracing::info!(task = %task.title, target = %task.privilege, "delegating");
                    elevator.elevate(ctx, task.privilege).await?;
                    summary.delegated.push(task.title.clone());
                    if let Err(e) = self.ledger.refresh() {
                        ctx.error_log.record(
                            &e.to_string(),
                            &self.ledger.path().display().to_string(),
                            "Could not re-read task ledger.",
                        );
                    }
                }
                Gate::Run => {
                    match process_task(task, ctx, &self.policy, &mut self.ledger).await {
                        Ok(failed) => summary.failed_actions += failed,
                        Err(e) => {
                            ctx.error_log
                                .record(&format!("{e:#}"), &task.title, "Error during task loop.")
                        }
                    }
                    summary.executed.push(task.title.clone());
                }
            }
            previous = task.privilege;
        }

        Ok(summary)
    }
}

// Runs every action of one task in order, then records the title.
async fn process_task(
    task: &mut Task,
    ctx: &RunContext,
    policy: &RetryPolicy,
    ledger: &mut Ledger,
) -> anyhow::Result<usize> {
    tracing::info!(task = %task.title, privilege = %task.privilege, "running task");
    let mut failed = 0;
    for action in task.actions.iter_mut() {
        let report = executor::run_action(action.as_mut(), policy, ctx).await;
        if !report.completed {
            tracing::warn!(
                task = %task.title,
                attempts = report.attempts,
                weight = report.weight,
                "action did not complete"
            );
            failed += 1;
        }
    }
    ctx.console.line("Task completed.");
    ledger.record(&task.title)?;
    Ok(failed)
}
