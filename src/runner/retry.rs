use crate::runner::engine::EngineExit;

/// Decides whether a run that left no artifact is attempted again.
pub trait RetryPolicy {
    /// `attempt` counts finished attempts, starting at 1.
    fn should_retry(&self, attempt: u32, exit: &EngineExit) -> bool;
}

/// One attempt per unit.
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _exit: &EngineExit) -> bool {
        false
    }
}

/// Re-run when the engine left no artifact, up to `max_attempts` runs in total.
pub struct RetryOnMissingArtifact {
    pub max_attempts: u32,
}

impl RetryPolicy for RetryOnMissingArtifact {
    fn should_retry(&self, attempt: u32, _exit: &EngineExit) -> bool {
        attempt < self.max_attempts
    }
}

/// Policy for `extra_attempts` configured retries.
pub fn policy_for(extra_attempts: u32) -> Box<dyn RetryPolicy> {
    if extra_attempts == 0 {
        Box::new(NoRetry)
    } else {
        Box::new(RetryOnMissingArtifact { max_attempts: extra_attempts + 1 })
    }
}
