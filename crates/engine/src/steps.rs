//! The five step operations and the values they hand to each other.
//!
//! Each operation consumes the typed output of its predecessor, so a job can
//! only be submitted with a [`ReadyCluster`] and only a [`SubmittedJob`] can
//! be waited on.

use std::time::Duration;

use emrflow_api::{ApiError, ClusterApi};
use emrflow_types::{
    ClusterHandle, ClusterSpec, ClusterState, ClusterStatus, JobSpec, JobStepStatus, StepHandle, StepKind, StepState,
};
use thiserror::Error;
use tracing::info;

use crate::control::ControlState;
use crate::poll::{PollPolicy, Polled, Probe, poll_until};

/// Cluster states in which the cluster accepts job steps.
pub const READY_STATES: [ClusterState; 2] = [ClusterState::Waiting, ClusterState::Running];

/// Reasons a step attempt fails.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("cluster {cluster} reached {state} before becoming ready{}", reason_suffix(.reason))]
    ClusterFailed {
        cluster: ClusterHandle,
        state: ClusterState,
        reason: Option<String>,
    },

    #[error("job step {step} ended {state}{}", reason_suffix(.reason))]
    JobFailed {
        step: StepHandle,
        state: StepState,
        reason: Option<String>,
    },

    #[error("gave up after {}s ({polls} status checks)", .waited.as_secs())]
    Timeout { waited: Duration, polls: u32 },

    #[error("gave up after {polls} status checks")]
    PollLimit { polls: u32 },

    #[error("run canceled")]
    Canceled,

    #[error("{step} needs the output of {needs}, which is not available")]
    MissingOutput { step: StepKind, needs: StepKind },
}

impl StepError {
    /// Whether another attempt of the same step could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(error) => error.is_transient(),
            Self::Timeout { .. } | Self::PollLimit { .. } => true,
            _ => false,
        }
    }

    /// Whether the cloud service tears the cluster down on its own after this failure.
    ///
    /// A terminating `ActionOnFailure` only fires for steps that ended `FAILED`;
    /// cancelled and interrupted steps leave the cluster running.
    pub fn triggers_failure_policy(&self, job: &JobSpec) -> bool {
        matches!(self, Self::JobFailed { state: StepState::Failed, .. }) && job.terminates_cluster_on_failure()
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|reason| format!(": {reason}")).unwrap_or_default()
}

/// Output of CreateCluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCluster {
    pub handle: ClusterHandle,
}

/// Output of WaitForClusterReady.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyCluster {
    pub handle: ClusterHandle,
    pub state: ClusterState,
    pub polls: u32,
}

/// Output of SubmitJob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub cluster: ClusterHandle,
    pub step: StepHandle,
}

/// Output of WaitForJobComplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub cluster: ClusterHandle,
    pub step: StepHandle,
    pub polls: u32,
}

pub async fn create_cluster(api: &dyn ClusterApi, spec: &ClusterSpec) -> Result<ProvisionedCluster, StepError> {
    let handle = api.create_cluster(spec).await?;
    info!(cluster = %handle, instances = spec.total_instance_count(), "cluster provisioning started");
    Ok(ProvisionedCluster { handle })
}

pub(crate) async fn wait_for_cluster_ready(
    api: &dyn ClusterApi,
    cluster: &ProvisionedCluster,
    policy: &PollPolicy,
    control: &mut ControlState,
) -> Result<ReadyCluster, StepError> {
    let handle = &cluster.handle;
    let Polled { value: state, polls } = poll_until(StepKind::WaitForClusterReady, policy, control, move || async move {
        let status = api.describe_cluster(handle).await?;
        Ok::<_, StepError>(classify_cluster(handle, status))
    })
    .await?;
    info!(cluster = %handle, %state, polls, "cluster ready");
    Ok(ReadyCluster {
        handle: handle.clone(),
        state,
        polls,
    })
}

pub async fn submit_job(api: &dyn ClusterApi, cluster: &ReadyCluster, job: &JobSpec) -> Result<SubmittedJob, StepError> {
    let step = api.add_job_step(&cluster.handle, job).await?;
    info!(cluster = %cluster.handle, step = %step, job = %job.name, "job step submitted");
    Ok(SubmittedJob {
        cluster: cluster.handle.clone(),
        step,
    })
}

pub(crate) async fn wait_for_job(
    api: &dyn ClusterApi,
    job: &SubmittedJob,
    policy: &PollPolicy,
    control: &mut ControlState,
) -> Result<CompletedJob, StepError> {
    let cluster = &job.cluster;
    let step = &job.step;
    let Polled { polls, .. } = poll_until(StepKind::WaitForJobComplete, policy, control, move || async move {
        let status = api.describe_step(cluster, step).await?;
        Ok::<_, StepError>(classify_step(step, status))
    })
    .await?;
    info!(cluster = %cluster, step = %step, polls, "job step completed");
    Ok(CompletedJob {
        cluster: cluster.clone(),
        step: step.clone(),
        polls,
    })
}

fn classify_cluster(handle: &ClusterHandle, status: ClusterStatus) -> Probe<ClusterState> {
    if READY_STATES.contains(&status.state) {
        Probe::Done(status.state)
    } else if status.state.is_shutting_down() {
        Probe::Failed(StepError::ClusterFailed {
            cluster: handle.clone(),
            state: status.state,
            reason: status.state_change_reason,
        })
    } else {
        Probe::Pending(status.state.to_string())
    }
}

fn classify_step(step: &StepHandle, status: JobStepStatus) -> Probe<StepState> {
    match status.state {
        StepState::Completed => Probe::Done(status.state),
        state if state.is_failure() => Probe::Failed(StepError::JobFailed {
            step: step.clone(),
            state,
            reason: status.failure_reason,
        }),
        state => Probe::Pending(state.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cluster_states() {
        let handle = ClusterHandle::new("j-ABC123");
        assert!(matches!(
            classify_cluster(&handle, ClusterStatus::new(ClusterState::Waiting)),
            Probe::Done(ClusterState::Waiting)
        ));
        assert!(matches!(
            classify_cluster(&handle, ClusterStatus::new(ClusterState::Bootstrapping)),
            Probe::Pending(state) if state == "BOOTSTRAPPING"
        ));
        let Probe::Failed(error) = classify_cluster(
            &handle,
            ClusterStatus::with_reason(ClusterState::TerminatedWithErrors, "bootstrap failed"),
        ) else {
            panic!("expected failure");
        };
        assert_eq!(
            error.to_string(),
            "cluster j-ABC123 reached TERMINATED_WITH_ERRORS before becoming ready: bootstrap failed"
        );
    }

    #[test]
    fn classifies_step_states() {
        let step = StepHandle::new("s-XYZ789");
        assert!(matches!(
            classify_step(&step, JobStepStatus::new(StepState::Completed)),
            Probe::Done(StepState::Completed)
        ));
        assert!(matches!(
            classify_step(&step, JobStepStatus::new(StepState::CancelPending)),
            Probe::Pending(_)
        ));
        let Probe::Failed(error) = classify_step(&step, JobStepStatus::failed("exit code 1")) else {
            panic!("expected failure");
        };
        assert!(!error.is_retryable());
        assert_eq!(error.to_string(), "job step s-XYZ789 ended FAILED: exit code 1");
    }

    #[test]
    fn only_failed_steps_trigger_the_failure_policy() {
        let job: JobSpec = serde_json::from_value(serde_json::json!({
            "Name": "j",
            "ActionOnFailure": "TERMINATE_CLUSTER",
            "HadoopJarStep": { "Jar": "command-runner.jar" }
        }))
        .expect("job spec");
        let ended = |state| StepError::JobFailed {
            step: StepHandle::new("s-1"),
            state,
            reason: None,
        };
        assert!(ended(StepState::Failed).triggers_failure_policy(&job));
        assert!(!ended(StepState::Cancelled).triggers_failure_policy(&job));
        assert!(!ended(StepState::Interrupted).triggers_failure_policy(&job));

        let continuing = JobSpec {
            action_on_failure: emrflow_types::ActionOnFailure::Continue,
            ..job
        };
        assert!(!ended(StepState::Failed).triggers_failure_policy(&continuing));
    }

    #[test]
    fn only_transient_api_errors_are_retryable() {
        let unavailable = StepError::Api(ApiError::Http {
            operation: "AddJobFlowSteps",
            status: 503,
            message: "busy".into(),
        });
        let rejected = StepError::Api(ApiError::Http {
            operation: "AddJobFlowSteps",
            status: 400,
            message: "ValidationException".into(),
        });
        assert!(unavailable.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!StepError::Api(ApiError::Configuration("bad url".into())).is_retryable());
        assert!(!StepError::Api(ApiError::UnknownCluster(ClusterHandle::new("j-1"))).is_retryable());
    }
}
