//! Deterministic in-process cluster service.
//!
//! The simulated backend walks clusters and steps through the same states the
//! real service reports, driven by the number of status queries rather than
//! wall-clock time. Handles, poll counts and failures are scriptable, and
//! every call is recorded so callers can assert on ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use emrflow_types::{
    ActionOnFailure, ClusterHandle, ClusterSpec, ClusterState, ClusterStatus, JobSpec, JobStepStatus, StepHandle,
    StepState,
};
use tracing::debug;

use crate::{ApiError, ClusterApi};

/// One recorded call against the simulated service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateCluster { name: String, instances: u32 },
    DescribeCluster(ClusterHandle),
    AddJobStep { cluster: ClusterHandle, job: String },
    DescribeStep { cluster: ClusterHandle, step: StepHandle },
    TerminateCluster(ClusterHandle),
}

#[derive(Debug, Clone)]
enum JobOutcome {
    Complete,
    End { state: StepState, reason: String },
}

#[derive(Debug)]
struct SimulatedStep {
    polls: u32,
    state: StepState,
    action_on_failure: ActionOnFailure,
}

#[derive(Debug)]
struct SimulatedCluster {
    polls: u32,
    status: ClusterStatus,
    steps: HashMap<StepHandle, SimulatedStep>,
    terminate_requests: usize,
}

#[derive(Debug)]
struct Script {
    cluster_ids: VecDeque<String>,
    step_ids: VecDeque<String>,
    polls_until_ready: u32,
    polls_until_step_done: u32,
    job_outcome: JobOutcome,
    bootstrap_failure: Option<String>,
    create_failures: u32,
    submit_failures: u32,
    submit_rejections: u32,
    terminate_failures: u32,
}

#[derive(Debug)]
struct SimulatedState {
    script: Script,
    serial: u32,
    clusters: HashMap<ClusterHandle, SimulatedCluster>,
    calls: Vec<ApiCall>,
}

/// Scriptable fake of the cluster-management service.
#[derive(Debug)]
pub struct SimulatedClusterApi {
    state: Mutex<SimulatedState>,
}

impl Default for SimulatedClusterApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClusterApi {
    /// A service where clusters are ready on the second status query and jobs
    /// complete on the second step query.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                script: Script {
                    cluster_ids: VecDeque::new(),
                    step_ids: VecDeque::new(),
                    polls_until_ready: 2,
                    polls_until_step_done: 2,
                    job_outcome: JobOutcome::Complete,
                    bootstrap_failure: None,
                    create_failures: 0,
                    submit_failures: 0,
                    submit_rejections: 0,
                    terminate_failures: 0,
                },
                serial: 0,
                clusters: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Hand out these cluster ids, in order, before falling back to generated ones.
    pub fn with_cluster_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().script.cluster_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_step_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().script.step_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Number of status queries after which a new cluster reports `WAITING`.
    pub fn ready_after(self, polls: u32) -> Self {
        self.lock().script.polls_until_ready = polls.max(1);
        self
    }

    /// Number of status queries after which a job step reaches its outcome.
    pub fn step_done_after(self, polls: u32) -> Self {
        self.lock().script.polls_until_step_done = polls.max(1);
        self
    }

    /// Make every job step fail with `reason`.
    pub fn fail_job(self, reason: impl Into<String>) -> Self {
        self.end_job(StepState::Failed, reason)
    }

    /// Make every job step end `CANCELLED`, as when an operator cancels it.
    pub fn cancel_job(self, reason: impl Into<String>) -> Self {
        self.end_job(StepState::Cancelled, reason)
    }

    pub fn interrupt_job(self, reason: impl Into<String>) -> Self {
        self.end_job(StepState::Interrupted, reason)
    }

    fn end_job(self, state: StepState, reason: impl Into<String>) -> Self {
        self.lock().script.job_outcome = JobOutcome::End {
            state,
            reason: reason.into(),
        };
        self
    }

    /// Make clusters terminate with errors instead of becoming ready.
    pub fn fail_bootstrap(self, reason: impl Into<String>) -> Self {
        self.lock().script.bootstrap_failure = Some(reason.into());
        self
    }

    /// Reject the next `count` create requests with a transient error.
    pub fn fail_creates(self, count: u32) -> Self {
        self.lock().script.create_failures = count;
        self
    }

    pub fn fail_submits(self, count: u32) -> Self {
        self.lock().script.submit_failures = count;
        self
    }

    /// Reject the next `count` step submissions as invalid requests.
    pub fn reject_submits(self, count: u32) -> Self {
        self.lock().script.submit_rejections = count;
        self
    }

    pub fn fail_terminations(self, count: u32) -> Self {
        self.lock().script.terminate_failures = count;
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Number of termination requests received for `cluster`.
    pub fn terminate_requests(&self, cluster: &ClusterHandle) -> usize {
        self.lock()
            .clusters
            .get(cluster)
            .map_or(0, |simulated| simulated.terminate_requests)
    }

    /// Current state of `cluster`, if it exists.
    pub fn cluster_state(&self, cluster: &ClusterHandle) -> Option<ClusterState> {
        self.lock().clusters.get(cluster).map(|simulated| simulated.status.state)
    }

    /// Every cluster created so far.
    pub fn clusters(&self) -> Vec<ClusterHandle> {
        let mut handles: Vec<ClusterHandle> = self.lock().clusters.keys().cloned().collect();
        handles.sort();
        handles
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn simulated_outage(operation: &'static str) -> ApiError {
    ApiError::Http {
        operation,
        status: 503,
        message: "simulated service outage".to_string(),
    }
}

#[async_trait]
impl ClusterApi for SimulatedClusterApi {
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterHandle, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::CreateCluster {
            name: spec.name.clone(),
            instances: spec.total_instance_count(),
        });
        if state.script.create_failures > 0 {
            state.script.create_failures -= 1;
            return Err(simulated_outage("RunJobFlow"));
        }

        state.serial += 1;
        let serial = state.serial;
        let id = state
            .script
            .cluster_ids
            .pop_front()
            .unwrap_or_else(|| format!("j-SIM{serial:08}"));
        let handle = ClusterHandle::new(id);
        state.clusters.insert(
            handle.clone(),
            SimulatedCluster {
                polls: 0,
                status: ClusterStatus::new(ClusterState::Starting),
                steps: HashMap::new(),
                terminate_requests: 0,
            },
        );
        debug!(cluster = %handle, "simulated cluster created");
        Ok(handle)
    }

    async fn describe_cluster(&self, cluster: &ClusterHandle) -> Result<ClusterStatus, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DescribeCluster(cluster.clone()));
        let polls_until_ready = state.script.polls_until_ready;
        let bootstrap_failure = state.script.bootstrap_failure.clone();
        let simulated = state
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| ApiError::UnknownCluster(cluster.clone()))?;

        simulated.polls += 1;
        simulated.status = match simulated.status.state {
            ClusterState::Starting | ClusterState::Bootstrapping if simulated.polls >= polls_until_ready => {
                match bootstrap_failure {
                    Some(reason) => ClusterStatus::with_reason(ClusterState::TerminatedWithErrors, reason),
                    None => ClusterStatus::new(ClusterState::Waiting),
                }
            }
            ClusterState::Starting if simulated.polls > 1 => ClusterStatus::new(ClusterState::Bootstrapping),
            ClusterState::Terminating => ClusterStatus {
                state: ClusterState::Terminated,
                state_change_reason: simulated.status.state_change_reason.clone(),
            },
            _ => simulated.status.clone(),
        };
        Ok(simulated.status.clone())
    }

    async fn add_job_step(&self, cluster: &ClusterHandle, job: &JobSpec) -> Result<StepHandle, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::AddJobStep {
            cluster: cluster.clone(),
            job: job.name.clone(),
        });
        if state.script.submit_failures > 0 {
            state.script.submit_failures -= 1;
            return Err(simulated_outage("AddJobFlowSteps"));
        }
        if state.script.submit_rejections > 0 {
            state.script.submit_rejections -= 1;
            return Err(ApiError::Http {
                operation: "AddJobFlowSteps",
                status: 400,
                message: "ValidationException: simulated invalid step".to_string(),
            });
        }

        let cluster_state = state
            .clusters
            .get(cluster)
            .map(|simulated| simulated.status.state)
            .ok_or_else(|| ApiError::UnknownCluster(cluster.clone()))?;
        if !matches!(cluster_state, ClusterState::Waiting | ClusterState::Running) {
            return Err(ApiError::Http {
                operation: "AddJobFlowSteps",
                status: 400,
                message: format!("cluster {cluster} is {cluster_state} and cannot accept steps"),
            });
        }

        state.serial += 1;
        let serial = state.serial;
        let id = state
            .script
            .step_ids
            .pop_front()
            .unwrap_or_else(|| format!("s-SIM{serial:08}"));
        let simulated = state
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| ApiError::UnknownCluster(cluster.clone()))?;
        let handle = StepHandle::new(id);
        simulated.status = ClusterStatus::new(ClusterState::Running);
        simulated.steps.insert(
            handle.clone(),
            SimulatedStep {
                polls: 0,
                state: StepState::Pending,
                action_on_failure: job.action_on_failure,
            },
        );
        debug!(cluster = %cluster, step = %handle, "simulated step added");
        Ok(handle)
    }

    async fn describe_step(&self, cluster: &ClusterHandle, step: &StepHandle) -> Result<JobStepStatus, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DescribeStep {
            cluster: cluster.clone(),
            step: step.clone(),
        });
        let polls_until_done = state.script.polls_until_step_done;
        let outcome = state.script.job_outcome.clone();
        let simulated = state
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| ApiError::UnknownCluster(cluster.clone()))?;
        let simulated_step = simulated.steps.get_mut(step).ok_or_else(|| ApiError::UnknownStep {
            cluster: cluster.clone(),
            step: step.clone(),
        })?;

        simulated_step.polls += 1;
        if matches!(simulated_step.state, StepState::Pending | StepState::Running) {
            if simulated_step.polls < polls_until_done {
                simulated_step.state = StepState::Running;
                return Ok(JobStepStatus::new(StepState::Running));
            }
            match &outcome {
                JobOutcome::Complete => {
                    simulated_step.state = StepState::Completed;
                    simulated.status = ClusterStatus::new(ClusterState::Waiting);
                }
                JobOutcome::End { state, .. } => {
                    simulated_step.state = *state;
                    if *state == StepState::Failed && simulated_step.action_on_failure.terminates_cluster() {
                        debug!(cluster = %cluster, step = %step, "step failure policy terminates simulated cluster");
                        simulated.status = ClusterStatus::with_reason(ClusterState::Terminating, "STEP_FAILURE");
                    } else {
                        simulated.status = ClusterStatus::new(ClusterState::Waiting);
                    }
                }
            }
        }

        Ok(match (simulated_step.state, outcome) {
            (state, JobOutcome::End { state: ended, reason }) if state == ended => JobStepStatus {
                state,
                failure_reason: Some(reason),
            },
            (state, _) => JobStepStatus::new(state),
        })
    }

    async fn terminate_cluster(&self, cluster: &ClusterHandle) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::TerminateCluster(cluster.clone()));
        let fail = state.script.terminate_failures > 0;
        if fail {
            state.script.terminate_failures -= 1;
        }
        let simulated = state
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| ApiError::UnknownCluster(cluster.clone()))?;
        simulated.terminate_requests += 1;
        if fail {
            return Err(simulated_outage("TerminateJobFlows"));
        }
        if !simulated.status.state.is_shutting_down() {
            simulated.status = ClusterStatus::with_reason(ClusterState::Terminating, "USER_REQUEST");
        }
        debug!(cluster = %cluster, "simulated cluster termination requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emrflow_types::{InstanceGroup, InstanceRole, InstancesConfig, Market, SparkSubmit};

    fn cluster_spec() -> ClusterSpec {
        let group = |name: &str, role, count| InstanceGroup {
            name: name.into(),
            market: Market::OnDemand,
            instance_role: role,
            instance_type: "m5.xlarge".into(),
            instance_count: count,
        };
        ClusterSpec {
            name: "Airflow-EMR-Cluster".into(),
            release_label: "emr-6.4.0".into(),
            applications: Vec::new(),
            instances: InstancesConfig {
                instance_groups: vec![group("Master nodes", InstanceRole::Master, 1), group("Worker nodes", InstanceRole::Core, 2)],
                keep_job_flow_alive_when_no_steps: true,
                termination_protected: false,
            },
            job_flow_role: None,
            service_role: None,
        }
    }

    fn job_spec() -> JobSpec {
        SparkSubmit::new("com.example.MySparkApp", "s3://my-bucket/app.jar")
            .into_job_spec("Run Spark Batch Job", ActionOnFailure::TerminateCluster)
    }

    #[tokio::test]
    async fn walks_cluster_and_step_lifecycle() {
        let api = SimulatedClusterApi::new()
            .with_cluster_ids(["j-ABC123"])
            .with_step_ids(["s-XYZ789"])
            .ready_after(3);

        let cluster = api.create_cluster(&cluster_spec()).await.unwrap();
        assert_eq!(cluster.as_str(), "j-ABC123");
        assert_eq!(api.describe_cluster(&cluster).await.unwrap().state, ClusterState::Starting);
        assert_eq!(api.describe_cluster(&cluster).await.unwrap().state, ClusterState::Bootstrapping);
        assert_eq!(api.describe_cluster(&cluster).await.unwrap().state, ClusterState::Waiting);

        let step = api.add_job_step(&cluster, &job_spec()).await.unwrap();
        assert_eq!(step.as_str(), "s-XYZ789");
        assert_eq!(api.describe_step(&cluster, &step).await.unwrap().state, StepState::Running);
        assert_eq!(api.describe_step(&cluster, &step).await.unwrap().state, StepState::Completed);

        api.terminate_cluster(&cluster).await.unwrap();
        assert_eq!(api.terminate_requests(&cluster), 1);
        assert_eq!(api.describe_cluster(&cluster).await.unwrap().state, ClusterState::Terminated);
        assert_eq!(
            api.calls()[0],
            ApiCall::CreateCluster {
                name: "Airflow-EMR-Cluster".into(),
                instances: 3
            }
        );
    }

    #[tokio::test]
    async fn rejects_steps_before_cluster_is_ready() {
        let api = SimulatedClusterApi::new();
        let cluster = api.create_cluster(&cluster_spec()).await.unwrap();
        let error = api.add_job_step(&cluster, &job_spec()).await.expect_err("not ready");
        assert!(matches!(error, ApiError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn failing_step_with_terminate_policy_shuts_cluster_down() {
        let api = SimulatedClusterApi::new().ready_after(1).step_done_after(1).fail_job("exit code 1");
        let cluster = api.create_cluster(&cluster_spec()).await.unwrap();
        api.describe_cluster(&cluster).await.unwrap();
        let step = api.add_job_step(&cluster, &job_spec()).await.unwrap();

        let status = api.describe_step(&cluster, &step).await.unwrap();
        assert_eq!(status, JobStepStatus::failed("exit code 1"));
        assert_eq!(api.cluster_state(&cluster), Some(ClusterState::Terminating));
        assert_eq!(api.terminate_requests(&cluster), 0);
    }

    #[tokio::test]
    async fn cancelled_step_leaves_cluster_running() {
        let api = SimulatedClusterApi::new().ready_after(1).step_done_after(1).cancel_job("cancelled by operator");
        let cluster = api.create_cluster(&cluster_spec()).await.unwrap();
        api.describe_cluster(&cluster).await.unwrap();
        let step = api.add_job_step(&cluster, &job_spec()).await.unwrap();

        let status = api.describe_step(&cluster, &step).await.unwrap();
        assert_eq!(status.state, StepState::Cancelled);
        assert_eq!(status.failure_reason.as_deref(), Some("cancelled by operator"));
        assert_eq!(api.cluster_state(&cluster), Some(ClusterState::Waiting));
    }

    #[tokio::test]
    async fn rejected_submissions_are_not_transient() {
        let api = SimulatedClusterApi::new().ready_after(1).reject_submits(1);
        let cluster = api.create_cluster(&cluster_spec()).await.unwrap();
        api.describe_cluster(&cluster).await.unwrap();
        let error = api.add_job_step(&cluster, &job_spec()).await.unwrap_err();
        assert!(!error.is_transient());
        assert!(api.add_job_step(&cluster, &job_spec()).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed() {
        let api = SimulatedClusterApi::new().fail_creates(1);
        assert!(api.create_cluster(&cluster_spec()).await.unwrap_err().is_transient());
        let cluster = api.create_cluster(&cluster_spec()).await.unwrap();
        assert_eq!(api.clusters(), vec![cluster.clone()]);
        assert!(matches!(
            api.describe_cluster(&ClusterHandle::new("j-MISSING")).await,
            Err(ApiError::UnknownCluster(_))
        ));
    }
}
