//! Poll loops for the two wait steps.
//!
//! A poll loop probes a status until the probe reports completion, reports a
//! terminal failure, the timeout elapses or the attempt guard trips. It sleeps
//! between probes through the run's control state so cancellation is observed.

use std::future::Future;
use std::time::Duration;

use emrflow_types::{RunEvent, StepKind};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::control::ControlState;
use crate::steps::StepError;

/// Hard upper bound on probes per poll loop.
pub const MAX_POLL_ATTEMPTS: u32 = 100_000;

/// Cadence and limits of one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits until the attempt guard trips.
    pub timeout: Option<Duration>,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Some(Duration::from_secs(7 * 86_400)),
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

/// Result of one probe.
#[derive(Debug)]
pub enum Probe<T> {
    Done(T),
    /// Still waiting; carries the observed state for events and logs.
    Pending(String),
    Failed(StepError),
}

/// Value produced by a finished poll loop and how many probes it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    pub value: T,
    pub polls: u32,
}

pub(crate) async fn poll_until<T, F, Fut>(
    step: StepKind,
    policy: &PollPolicy,
    control: &mut ControlState,
    mut probe: F,
) -> Result<Polled<T>, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, StepError>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.clamp(1, MAX_POLL_ATTEMPTS);
    let mut polls = 0u32;

    loop {
        polls += 1;
        let state = match probe().await? {
            Probe::Done(value) => {
                control.emit(RunEvent::StepPolled {
                    step,
                    poll: polls,
                    state: "done".to_string(),
                });
                return Ok(Polled { value, polls });
            }
            Probe::Failed(error) => return Err(error),
            Probe::Pending(state) => state,
        };
        debug!(%step, poll = polls, %state, "status not final yet");
        control.emit(RunEvent::StepPolled {
            step,
            poll: polls,
            state,
        });

        if polls >= max_attempts {
            warn!(%step, polls, "poll guard tripped");
            return Err(StepError::PollLimit { polls });
        }
        if let Some(timeout) = policy.timeout
            && started.elapsed() >= timeout
        {
            warn!(%step, polls, timeout_secs = timeout.as_secs(), "poll timeout elapsed");
            return Err(StepError::Timeout { waited: timeout, polls });
        }

        control.sleep(policy.interval).await?;
    }
}
