use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::ElevationSection;
use crate::context::RunContext;

use super::launcher::LaunchMode;

/// Argument that starts the disable-only child mode.
pub const DISABLE_PROTECTION_ARG: &str = "disable-protection";

/// How one strategy attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Succeeded,
    TimedOut,
    Crashed(String),
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Succeeded => write!(f, "succeeded"),
            AttemptState::TimedOut => write!(f, "timed out"),
            AttemptState::Crashed(reason) => write!(f, "crashed: {reason}"),
        }
    }
}

/// Delays used before a child attempt re-kills the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rekill {
    pub settle: Duration,
    pub resettle: Duration,
}

/// One way of turning protection off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Graceful disable in this process.
    InProcess,
    /// Kill the engine, then disable in this process.
    KillAndRetry,
    /// Elevated `disable-protection` child that must exit 0 in time.
    SpawnChild {
        timeout: Duration,
        rekill: Option<Rekill>,
    },
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::InProcess => write!(f, "in-process disable"),
            Strategy::KillAndRetry => write!(f, "kill engine and disable"),
            Strategy::SpawnChild { timeout, rekill } => {
                write!(f, "child disable ({}s", timeout.as_secs())?;
                if rekill.is_some() {
                    write!(f, ", after re-kill")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("all {attempts} protection disable attempts failed, last: {last}")]
pub struct CascadeError {
    pub attempts: usize,
    pub last: AttemptState,
}

/// Ordered fallback strategies. Stops at the first success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisablePlan {
    steps: Vec<Strategy>,
    attempt_timeout: Duration,
}

impl DisablePlan {
    /// Plan used by the disable-only child.
    pub fn in_child(section: &ElevationSection) -> Self {
        Self {
            steps: vec![Strategy::InProcess, Strategy::KillAndRetry],
            attempt_timeout: section.child_timeout(),
        }
    }

    /// Plan used while preparing the system, given whether the initial
    /// engine kill worked.
    pub fn prepare(section: &ElevationSection, engine_killed: bool) -> Self {
        let steps = if engine_killed {
            vec![
                Strategy::SpawnChild {
                    timeout: section.simple_child_timeout(),
                    rekill: None,
                },
                Strategy::InProcess,
            ]
        } else {
            vec![
                Strategy::InProcess,
                Strategy::KillAndRetry,
                Strategy::SpawnChild {
                    timeout: section.child_timeout(),
                    rekill: None,
                },
                Strategy::SpawnChild {
                    timeout: section.child_timeout(),
                    rekill: Some(Rekill {
                        settle: Duration::from_millis(section.settle_ms),
                        resettle: Duration::from_millis(section.resettle_ms),
                    }),
                },
                Strategy::InProcess,
            ]
        };
        Self {
            steps,
            attempt_timeout: section.child_timeout(),
        }
    }

    #[cfg(test)]
    pub fn steps(&self) -> &[Strategy] {
        &self.steps
    }

    /// Runs strategies in order. Returns the index of the one that worked.
    ///
    /// Every failed attempt is written to the error log before the next
    /// strategy starts.
    pub async fn run(&self, ctx: &RunContext) -> Result<usize, CascadeError> {
        let mut last = AttemptState::Crashed("no strategy attempted".to_string());
        for (index, strategy) in self.steps.iter().enumerate() {
            tracing::debug!(%strategy, "attempting protection disable");
            let state = strategy.attempt(ctx, self.attempt_timeout).await;
            if state == AttemptState::Succeeded {
                tracing::info!(%strategy, "protection disabled");
                return Ok(index);
            }
            ctx.error_log.record(
                &state.to_string(),
                &strategy.to_string(),
                "Protection disable attempt failed.",
            );
            last = state;
        }
        Err(CascadeError {
            attempts: self.steps.len(),
            last,
        })
    }
}

impl Strategy {
    async fn attempt(&self, ctx: &RunContext, attempt_timeout: Duration) -> AttemptState {
        match self {
            Strategy::InProcess => bounded(attempt_timeout, ctx.protection.disable()).await,
            Strategy::KillAndRetry => {
                if !ctx.protection.kill_engine() {
                    tracing::warn!("engine kill failed before retrying disable");
                }
                bounded(attempt_timeout, ctx.protection.disable()).await
            }
            Strategy::SpawnChild { timeout, rekill } => {
                if let Some(rekill) = rekill {
                    tokio::time::sleep(rekill.settle).await;
                    if !ctx.protection.kill_engine() {
                        tokio::time::sleep(rekill.resettle).await;
                        ctx.protection.kill_engine();
                    }
                }
                spawn_child(ctx, *timeout).await
            }
        }
    }
}

async fn bounded<F>(timeout: Duration, attempt: F) -> AttemptState
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => AttemptState::Succeeded,
        Ok(Err(e)) => AttemptState::Crashed(format!("{e:#}")),
        Err(_) => AttemptState::TimedOut,
    }
}

async fn spawn_child(ctx: &RunContext, timeout: Duration) -> AttemptState {
    let mut args = ctx.child_args.clone();
    args.push(DISABLE_PROTECTION_ARG.to_string());

    let mut child = match ctx.launcher.launch(LaunchMode::Elevated, &args) {
        Ok(child) => child,
        Err(e) => return AttemptState::Crashed(format!("could not launch child: {e}")),
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(0)) => AttemptState::Succeeded,
        Ok(Ok(code)) => AttemptState::Crashed(format!("Exit code was nonzero ({code}).")),
        Ok(Err(e)) => AttemptState::Crashed(e.to_string()),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("could not kill timed out child: {e}");
            }
            AttemptState::TimedOut
        }
    }
}

/// Kills the engine, then runs the preparation plan.
pub async fn prepare_system(ctx: &RunContext) -> Result<(), CascadeError> {
    let killed = ctx.protection.kill_engine();
    if !killed {
        ctx.error_log
            .record("Unknown reason", "", "Could not kill protection engine.");
    }
    DisablePlan::prepare(&ctx.config.elevation, killed)
        .run(ctx)
        .await
        .map(|_| ())
}

/// Body of the disable-only child. Returns its exit code.
pub async fn disable_in_child(ctx: &RunContext) -> i32 {
    match DisablePlan::in_child(&ctx.config.elevation).run(ctx).await {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!("{e}");
            1
        }
    }
}
