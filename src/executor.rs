//! Retry Executor: drives one action through its attempt state machine.

use crate::action::Action;
use crate::context::RunContext;
use crate::state_machine::{ActionRun, AttemptOutcome, RetryPolicy, Transition};
use crate::ui::WEIGHT_PREFIX;

/// How one action's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionReport {
    pub attempts: u32,
    pub completed: bool,
    pub weight: u32,
}

/// Runs `action` until it completes or the policy gives up.
///
/// Every raised error is written to the error log before the retry decision.
/// `Status: <status>` follows each attempt; the weight line is printed exactly
/// once, whether or not the action completed.
pub async fn run_action(
    action: &mut dyn Action,
    policy: &RetryPolicy,
    ctx: &RunContext,
) -> ActionReport {
    let mut run = ActionRun::new(*policy);
    let mut attempt = 1;

    let (attempts, completed) = loop {
        if let Some(delay) = policy.delay_before(attempt) {
            tokio::time::sleep(delay).await;
        }

        let result = action.run().await;
        action.reset_progress();

        let outcome = match result {
            Ok(()) => AttemptOutcome::Returned(action.status()),
            Err(e) => {
                ctx.error_log.record(
                    &e.to_string(),
                    e.context.as_deref().unwrap_or_default(),
                    &action.error_string(),
                );
                AttemptOutcome::Failed(e.kind)
            }
        };
        ctx.console.line(&format!("Status: {}", action.status()));

        match run.next(outcome) {
            Transition::Retry { next_attempt } => {
                tracing::debug!(attempt, "retrying action");
                attempt = next_attempt;
            }
            Transition::Complete { attempts } => break (attempts, true),
            Transition::Exhausted { attempts } => break (attempts, false),
        }
    };

    if !completed {
        let error = action.error_string();
        ctx.error_log.record(&error, "", "Action failed to complete.");
        ctx.console.action_error(&error);
    }

    let weight = action.progress_weight();
    ctx.console.line(&format!("{WEIGHT_PREFIX}{weight}"));

    ActionReport {
        attempts,
        completed,
        weight,
    }
}
