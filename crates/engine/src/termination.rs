//! Single idempotent teardown path for a run's cluster.
//!
//! A cluster can be torn down by the workflow's terminate step, by a
//! compensating action after a failure or cancellation, or by the cloud
//! service itself when the job's failure policy says so. All three go through
//! [`TerminationGuard`], which sends at most one accepted termination request
//! per cluster handle.

use std::collections::HashMap;

use emrflow_api::{ApiError, ClusterApi};
use emrflow_types::{ClusterHandle, ClusterState, TerminationSource};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How a cluster's teardown was covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// A termination request was accepted by the service.
    Requested(TerminationSource),
    /// The cluster was already shutting down when checked.
    AlreadyShuttingDown(ClusterState),
    /// The job's failure policy made the service terminate the cluster on its own.
    DelegatedToFailurePolicy,
}

impl TerminationOutcome {
    pub fn source(self) -> TerminationSource {
        match self {
            Self::Requested(source) => source,
            Self::AlreadyShuttingDown(_) => TerminationSource::Service,
            Self::DelegatedToFailurePolicy => TerminationSource::FailurePolicy,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Self::Requested(_) => "termination requested".to_string(),
            Self::AlreadyShuttingDown(state) => format!("cluster already {state}; no request sent"),
            Self::DelegatedToFailurePolicy => "terminated by the job failure policy".to_string(),
        }
    }
}

/// Tracks which clusters already have their teardown covered.
#[derive(Debug, Default)]
pub struct TerminationGuard {
    claims: Mutex<HashMap<ClusterHandle, TerminationOutcome>>,
}

impl TerminationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure `cluster` is being torn down, sending a request only when nothing else covers it.
    ///
    /// A delegation to the failure policy is only trusted once the cluster is
    /// seen shutting down. A failed request leaves the cluster unclaimed so a
    /// later attempt may retry it.
    pub async fn ensure_terminated(
        &self,
        api: &dyn ClusterApi,
        cluster: &ClusterHandle,
        source: TerminationSource,
    ) -> Result<TerminationOutcome, ApiError> {
        let mut claims = self.claims.lock().await;
        let delegated = match claims.get(cluster) {
            Some(TerminationOutcome::DelegatedToFailurePolicy) => true,
            Some(outcome) => {
                debug!(%cluster, ?outcome, "termination already covered");
                return Ok(*outcome);
            }
            None => false,
        };

        match api.describe_cluster(cluster).await {
            Ok(status) if status.state.is_shutting_down() => {
                let outcome = if delegated {
                    debug!(%cluster, state = %status.state, "failure policy is tearing the cluster down");
                    TerminationOutcome::DelegatedToFailurePolicy
                } else {
                    info!(%cluster, state = %status.state, "cluster already shutting down; skipping termination request");
                    TerminationOutcome::AlreadyShuttingDown(status.state)
                };
                claims.insert(cluster.clone(), outcome);
                return Ok(outcome);
            }
            Ok(status) if delegated => {
                warn!(%cluster, state = %status.state, "failure policy did not shut the cluster down; requesting termination");
            }
            Ok(_) => {}
            Err(error) => warn!(%cluster, %error, "could not check cluster state before terminating"),
        }

        api.terminate_cluster(cluster).await?;
        info!(%cluster, ?source, "cluster termination requested");
        let outcome = TerminationOutcome::Requested(source);
        claims.insert(cluster.clone(), outcome);
        Ok(outcome)
    }

    /// Records that the cloud service tears `cluster` down on its own.
    pub async fn delegate_to_failure_policy(&self, cluster: &ClusterHandle) {
        let mut claims = self.claims.lock().await;
        claims
            .entry(cluster.clone())
            .or_insert(TerminationOutcome::DelegatedToFailurePolicy);
        info!(%cluster, "cluster teardown delegated to the job failure policy");
    }

    /// Outcome recorded for `cluster`, if its teardown is covered.
    pub async fn outcome(&self, cluster: &ClusterHandle) -> Option<TerminationOutcome> {
        self.claims.lock().await.get(cluster).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emrflow_api::SimulatedClusterApi;
    use emrflow_types::{ClusterSpec, InstanceGroup, InstanceRole, InstancesConfig, Market};

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "c".into(),
            release_label: "emr-6.4.0".into(),
            applications: Vec::new(),
            instances: InstancesConfig {
                instance_groups: vec![InstanceGroup {
                    name: "Master nodes".into(),
                    market: Market::OnDemand,
                    instance_role: InstanceRole::Master,
                    instance_type: "m5.xlarge".into(),
                    instance_count: 1,
                }],
                keep_job_flow_alive_when_no_steps: true,
                termination_protected: false,
            },
            job_flow_role: None,
            service_role: None,
        }
    }

    #[tokio::test]
    async fn sends_one_request_per_handle() {
        let api = SimulatedClusterApi::new().ready_after(1);
        let cluster = api.create_cluster(&spec()).await.unwrap();
        api.describe_cluster(&cluster).await.unwrap();
        let guard = TerminationGuard::new();

        let first = guard
            .ensure_terminated(&api, &cluster, TerminationSource::WorkflowStep)
            .await
            .unwrap();
        let second = guard
            .ensure_terminated(&api, &cluster, TerminationSource::Compensation)
            .await
            .unwrap();

        assert_eq!(first, TerminationOutcome::Requested(TerminationSource::WorkflowStep));
        assert_eq!(second, first);
        assert_eq!(api.terminate_requests(&cluster), 1);
    }

    #[tokio::test]
    async fn delegated_clusters_shutting_down_are_not_requested() {
        let api = SimulatedClusterApi::new().ready_after(1);
        let cluster = api.create_cluster(&spec()).await.unwrap();
        api.terminate_cluster(&cluster).await.unwrap();
        let guard = TerminationGuard::new();

        guard.delegate_to_failure_policy(&cluster).await;
        let outcome = guard
            .ensure_terminated(&api, &cluster, TerminationSource::Compensation)
            .await
            .unwrap();

        assert_eq!(outcome, TerminationOutcome::DelegatedToFailurePolicy);
        assert_eq!(outcome.source(), TerminationSource::FailurePolicy);
        assert_eq!(api.terminate_requests(&cluster), 1);
    }

    #[tokio::test]
    async fn delegation_is_verified_before_it_is_trusted() {
        let api = SimulatedClusterApi::new().ready_after(1);
        let cluster = api.create_cluster(&spec()).await.unwrap();
        api.describe_cluster(&cluster).await.unwrap();
        let guard = TerminationGuard::new();

        guard.delegate_to_failure_policy(&cluster).await;
        let outcome = guard
            .ensure_terminated(&api, &cluster, TerminationSource::Compensation)
            .await
            .unwrap();

        assert_eq!(outcome, TerminationOutcome::Requested(TerminationSource::Compensation));
        assert_eq!(api.terminate_requests(&cluster), 1);
        assert_eq!(api.cluster_state(&cluster), Some(ClusterState::Terminating));
    }

    #[tokio::test]
    async fn failed_request_releases_the_claim() {
        let api = SimulatedClusterApi::new().ready_after(1).fail_terminations(1);
        let cluster = api.create_cluster(&spec()).await.unwrap();
        let guard = TerminationGuard::new();

        assert!(
            guard
                .ensure_terminated(&api, &cluster, TerminationSource::WorkflowStep)
                .await
                .is_err()
        );
        assert_eq!(guard.outcome(&cluster).await, None);

        let outcome = guard
            .ensure_terminated(&api, &cluster, TerminationSource::WorkflowStep)
            .await
            .unwrap();
        assert_eq!(outcome, TerminationOutcome::Requested(TerminationSource::WorkflowStep));
        assert_eq!(api.terminate_requests(&cluster), 2);
    }

    #[tokio::test]
    async fn skips_request_for_clusters_already_shutting_down() {
        let api = SimulatedClusterApi::new().ready_after(1);
        let cluster = api.create_cluster(&spec()).await.unwrap();
        api.terminate_cluster(&cluster).await.unwrap();
        let guard = TerminationGuard::new();

        let outcome = guard
            .ensure_terminated(&api, &cluster, TerminationSource::Compensation)
            .await
            .unwrap();
        assert_eq!(outcome, TerminationOutcome::AlreadyShuttingDown(ClusterState::Terminated));
        assert_eq!(outcome.source(), TerminationSource::Service);
        assert_eq!(api.terminate_requests(&cluster), 1);
    }
}
