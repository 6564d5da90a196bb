use std::fmt;

use crate::action::{ActionStatus, ErrorKind};

use super::policy::RetryPolicy;

/// What one attempt of an action produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The attempt returned and the action reports this status.
    Returned(ActionStatus),
    /// The attempt raised an error of this kind.
    Failed(ErrorKind),
}

/// The result of evaluating an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run another attempt.
    Retry { next_attempt: u32 },
    /// The action reports completion.
    Complete { attempts: u32 },
    /// The bound was reached, or a failure made retrying futile.
    Exhausted { attempts: u32 },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Retry { next_attempt } => write!(f, "RETRY({next_attempt})"),
            Transition::Complete { attempts } => write!(f, "COMPLETE after {attempts}"),
            Transition::Exhausted { attempts } => write!(f, "EXHAUSTED after {attempts}"),
        }
    }
}

/// Attempt counter for one action.
///
/// Every outcome fed to [`ActionRun::next`] counts as one attempt. A
/// non-retryable failure forces the counter to the bound so the run ends
/// immediately.
#[derive(Debug, Clone)]
pub struct ActionRun {
    policy: RetryPolicy,
    attempts: u32,
}

impl ActionRun {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts evaluated so far.
    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next(&mut self, outcome: AttemptOutcome) -> Transition {
        self.attempts += 1;

        let transition = match outcome {
            AttemptOutcome::Returned(ActionStatus::Completed) => Transition::Complete {
                attempts: self.attempts,
            },
            AttemptOutcome::Failed(kind) if !kind.is_retryable() => {
                let attempts = self.attempts;
                self.attempts = self.policy.max_attempts;
                Transition::Exhausted { attempts }
            }
            AttemptOutcome::Returned(ActionStatus::NotCompleted) | AttemptOutcome::Failed(_) => {
                if self.attempts >= self.policy.max_attempts {
                    Transition::Exhausted {
                        attempts: self.attempts,
                    }
                } else {
                    Transition::Retry {
                        next_attempt: self.attempts + 1,
                    }
                }
            }
        };

        tracing::debug!(%transition, "attempt evaluated");
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(max_attempts: u32) -> ActionRun {
        ActionRun::new(RetryPolicy {
            max_attempts,
            ..Default::default()
        })
    }

    #[test]
    fn completion_on_first_attempt() {
        let mut r = run(10);
        let t = r.next(AttemptOutcome::Returned(ActionStatus::Completed));
        assert_eq!(t, Transition::Complete { attempts: 1 });
    }

    #[test]
    fn retryable_failures_run_to_the_bound() {
        let mut r = run(10);
        for attempt in 1..10 {
            let t = r.next(AttemptOutcome::Failed(ErrorKind::Other));
            assert_eq!(
                t,
                Transition::Retry {
                    next_attempt: attempt + 1
                }
            );
        }
        let t = r.next(AttemptOutcome::Failed(ErrorKind::Other));
        assert_eq!(t, Transition::Exhausted { attempts: 10 });
        assert_eq!(r.attempts(), 10);
    }

    #[test]
    fn non_retryable_failure_stops_after_one_attempt() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Permission,
            ErrorKind::UnauthorizedAccess,
            ErrorKind::Timeout,
        ] {
            let mut r = run(10);
            let t = r.next(AttemptOutcome::Failed(kind));
            assert_eq!(t, Transition::Exhausted { attempts: 1 });
            assert_eq!(r.attempts(), 10, "{kind} forces the counter to the bound");
        }
    }

    #[test]
    fn not_completed_without_error_is_retried() {
        let mut r = run(2);
        let t = r.next(AttemptOutcome::Returned(ActionStatus::NotCompleted));
        assert_eq!(t, Transition::Retry { next_attempt: 2 });
        let t = r.next(AttemptOutcome::Returned(ActionStatus::NotCompleted));
        assert_eq!(t, Transition::Exhausted { attempts: 2 });
    }

    #[test]
    fn success_after_failures() {
        let mut r = run(10);
        for _ in 0..9 {
            r.next(AttemptOutcome::Failed(ErrorKind::Other));
        }
        let t = r.next(AttemptOutcome::Returned(ActionStatus::Completed));
        assert_eq!(t, Transition::Complete { attempts: 10 });
    }

    #[test]
    fn single_attempt_bound() {
        let mut r = run(1);
        let t = r.next(AttemptOutcome::Failed(ErrorKind::Other));
        assert_eq!(t, Transition::Exhausted { attempts: 1 });
    }

    #[test]
    fn transition_display() {
        assert_eq!(Transition::Retry { next_attempt: 2 }.to_string(), "RETRY(2)");
        assert_eq!(Transition::Complete { attempts: 1 }.to_string(), "COMPLETE after 1");
        assert_eq!(
            Transition::Exhausted { attempts: 10 }.to_string(),
            "EXHAUSTED after 10"
        );
    }
}
