//! Cluster specification and lifecycle types.
//!
//! The structures in this module serialize with the managed cluster service's
//! PascalCase wire names, so a `cluster:` block in a workflow document is the
//! literal request body sent when provisioning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier returned by the cloud service for a provisioned cluster (for example, `j-ABC123`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterHandle(String);

impl ClusterHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full provisioning request for a transient cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterSpec {
    /// Human-readable cluster name.
    pub name: String,
    /// Software release version (for example, `emr-6.4.0`).
    pub release_label: String,
    /// Applications installed on every node.
    #[serde(default)]
    pub applications: Vec<Application>,
    /// Instance groups and lifecycle flags.
    pub instances: InstancesConfig,
    /// Instance profile assumed by cluster nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_flow_role: Option<String>,
    /// Role assumed by the cluster service itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_role: Option<String>,
}

impl ClusterSpec {
    /// Total number of instances requested across every instance group.
    pub fn total_instance_count(&self) -> u32 {
        self.instances
            .instance_groups
            .iter()
            .map(|group| group.instance_count)
            .sum()
    }

    /// Returns true when the named application is requested (case-insensitive).
    pub fn has_application(&self, name: &str) -> bool {
        self.applications
            .iter()
            .any(|application| application.name.eq_ignore_ascii_case(name))
    }

    /// Instance groups playing the requested role.
    pub fn groups_with_role(&self, role: InstanceRole) -> impl Iterator<Item = &InstanceGroup> {
        self.instances
            .instance_groups
            .iter()
            .filter(move |group| group.instance_role == role)
    }
}

/// An application installed on the cluster (for example, `Spark`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Application {
    pub name: String,
}

/// Instance layout plus lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstancesConfig {
    pub instance_groups: Vec<InstanceGroup>,
    /// Keep the cluster alive after its last step finishes.
    #[serde(default)]
    pub keep_job_flow_alive_when_no_steps: bool,
    /// Reject termination requests while set.
    #[serde(default)]
    pub termination_protected: bool,
}

/// A homogeneous group of instances sharing a role, machine type and market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub market: Market,
    pub instance_role: InstanceRole,
    pub instance_type: String,
    pub instance_count: u32,
}

/// Pricing market for an instance group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Market {
    #[default]
    OnDemand,
    Spot,
}

/// Role played by an instance group within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceRole {
    Master,
    Core,
    Task,
}

/// Lifecycle states reported by the cluster service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Starting,
    Bootstrapping,
    Running,
    Waiting,
    Terminating,
    Terminated,
    TerminatedWithErrors,
}

impl ClusterState {
    /// Returns true once the cluster is going away or gone.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated | Self::TerminatedWithErrors)
    }

    /// Wire name of the state (for example, `WAITING`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Bootstrapping => "BOOTSTRAPPING",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::TerminatedWithErrors => "TERMINATED_WITH_ERRORS",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a cluster returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub state: ClusterState,
    /// Reason attached to the latest state change, when the service provides one.
    #[serde(default)]
    pub state_change_reason: Option<String>,
}

impl ClusterStatus {
    pub fn new(state: ClusterState) -> Self {
        Self {
            state,
            state_change_reason: None,
        }
    }

    pub fn with_reason(state: ClusterState, reason: impl Into<String>) -> Self {
        Self {
            state,
            state_change_reason: Some(reason.into()),
        }
    }
}
