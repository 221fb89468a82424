//! Uniform per-step retry policy.

use std::time::Duration;

use crate::steps::StepError;

/// How many extra attempts a failing step gets and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether another attempt should follow attempt number `attempt` (1-based) failing with `error`.
    pub fn should_retry(&self, attempt: u32, error: &StepError) -> bool {
        attempt < self.max_attempts() && error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emrflow_api::ApiError;
    use emrflow_types::{ClusterHandle, ClusterState};

    #[test]
    fn retries_until_attempts_are_exhausted() {
        let policy = RetryPolicy::default();
        let error = StepError::Api(ApiError::Transport {
            operation: "RunJobFlow",
            message: "connection reset".into(),
        });
        assert_eq!(policy.max_attempts(), 2);
        assert!(policy.should_retry(1, &error));
        assert!(!policy.should_retry(2, &error));
    }

    #[test]
    fn terminal_failures_are_not_retried() {
        let policy = RetryPolicy {
            retries: 3,
            delay: Duration::from_secs(1),
        };
        let error = StepError::ClusterFailed {
            cluster: ClusterHandle::new("j-1"),
            state: ClusterState::TerminatedWithErrors,
            reason: None,
        };
        assert!(!policy.should_retry(1, &error));
        assert!(!policy.should_retry(1, &StepError::Canceled));
    }
}
