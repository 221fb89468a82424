//! Per-run state threaded between steps.

use emrflow_types::ClusterHandle;

use crate::steps::{CompletedJob, ProvisionedCluster, ReadyCluster, SubmittedJob};
use crate::termination::TerminationGuard;

/// Typed outputs of the steps executed so far in one run.
///
/// A fresh context is created for every run, so handles are never carried
/// from one run into the next.
#[derive(Debug, Default)]
pub struct RunContext {
    pub cluster: Option<ProvisionedCluster>,
    pub ready: Option<ReadyCluster>,
    pub job: Option<SubmittedJob>,
    pub completed: Option<CompletedJob>,
    pub termination: TerminationGuard,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the cluster created by this run, if any.
    pub fn cluster_handle(&self) -> Option<&ClusterHandle> {
        self.cluster.as_ref().map(|cluster| &cluster.handle)
    }
}
