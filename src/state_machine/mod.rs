mod policy;
mod state;

pub use policy::RetryPolicy;
pub use state::{ActionRun, AttemptOutcome, Transition};
