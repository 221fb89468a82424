//! Strongly typed workflow definition shared by the engine and the CLI.
//!
//! A workflow document declares one transient-cluster batch pipeline: the
//! cluster to provision, the job to submit, the schedule it runs on and the
//! run-level policies (retry, polling, termination). The five steps themselves
//! are fixed and enumerated by [`StepKind`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ClusterSpec, JobSpec, Schedule, StartDate};

pub mod validation;

/// Credential profile used when a document does not name one.
pub const DEFAULT_CONNECTION: &str = "aws_default";

/// Fully authored workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Canonical workflow identifier (for example, `emr_spark_job_dag`).
    pub workflow: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub start_date: StartDate,
    /// Run every missed interval instead of only the latest one.
    #[serde(default)]
    pub catchup: bool,
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: u32,
    #[serde(default)]
    pub default_args: DefaultArgs,
    /// Named credential profile resolved by the API client.
    #[serde(default = "default_connection")]
    pub connection: String,
    pub cluster: ClusterSpec,
    pub job: JobSpec,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub termination: TerminationMode,
}

/// Arguments applied uniformly to every step of the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultArgs {
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Whether a run waits for the previous run to have succeeded.
    #[serde(default)]
    pub depends_on_past: bool,
    /// Additional attempts granted to a failing step.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay between attempts (for example, `5m`).
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

impl Default for DefaultArgs {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            depends_on_past: false,
            retries: default_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Poll cadence and limits for the two wait steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingSettings {
    #[serde(default)]
    pub cluster: PollSettings,
    #[serde(default)]
    pub job: PollSettings,
}

/// Settings for one poll loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSettings {
    /// Interval between status checks (for example, `60s`).
    #[serde(default = "default_poke_interval")]
    pub poke_interval: String,
    /// Give up once this much time has elapsed; `None` waits indefinitely.
    #[serde(default = "default_poll_timeout")]
    pub timeout: Option<String>,
    /// Upper bound on status checks regardless of elapsed time.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poke_interval: default_poke_interval(),
            timeout: default_poll_timeout(),
            max_attempts: None,
        }
    }
}

/// Which exit paths tear the cluster down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminationMode {
    /// Terminate on success, failure and cancellation once a cluster exists.
    #[default]
    AllExitPaths,
    /// Terminate only after the job completed; failures rely on the job's failure policy.
    SuccessOnly,
}

/// The five fixed steps of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreateCluster,
    WaitForClusterReady,
    SubmitJob,
    WaitForJobComplete,
    TerminateCluster,
}

impl StepKind {
    /// Every step in execution order.
    pub const SEQUENCE: [StepKind; 5] = [
        StepKind::CreateCluster,
        StepKind::WaitForClusterReady,
        StepKind::SubmitJob,
        StepKind::WaitForJobComplete,
        StepKind::TerminateCluster,
    ];

    /// Stable task identifier used in logs, events and run records.
    pub fn task_id(self) -> &'static str {
        match self {
            Self::CreateCluster => "create_emr_cluster",
            Self::WaitForClusterReady => "wait_for_emr_cluster",
            Self::SubmitJob => "add_spark_step",
            Self::WaitForJobComplete => "wait_for_spark_step",
            Self::TerminateCluster => "terminate_emr_cluster",
        }
    }

    /// Step that must succeed before this one starts.
    pub fn predecessor(self) -> Option<StepKind> {
        let index = Self::SEQUENCE.iter().position(|step| *step == self)?;
        index.checked_sub(1).map(|previous| Self::SEQUENCE[previous])
    }

    /// Steps that only observe state and never mutate cloud resources.
    pub fn is_wait(self) -> bool {
        matches!(self, Self::WaitForClusterReady | Self::WaitForJobComplete)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::CreateCluster => "Provision the transient cluster",
            Self::WaitForClusterReady => "Wait for the cluster to become ready",
            Self::SubmitJob => "Submit the batch job as a cluster step",
            Self::WaitForJobComplete => "Wait for the batch job to complete",
            Self::TerminateCluster => "Terminate the cluster",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_id())
    }
}

fn default_max_active_runs() -> u32 {
    1
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

fn default_owner() -> String {
    "emrflow".to_string()
}

fn default_retries() -> u32 {
    1
}

fn default_retry_delay() -> String {
    "5m".to_string()
}

fn default_poke_interval() -> String {
    "60s".to_string()
}

fn default_poll_timeout() -> Option<String> {
    Some("7d".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionOnFailure, InstanceRole};

    #[test]
    fn repository_workflow_parses() {
        let yaml_text = include_str!("../../../workflows/emr_spark_job.yaml");
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml_text).expect("parse sample workflow");

        assert_eq!(definition.workflow, "emr_spark_job_dag");
        assert_eq!(definition.schedule, Schedule::Daily);
        assert_eq!(definition.start_date, StartDate::Relative { days_ago: 1 });
        assert!(!definition.catchup);
        assert_eq!(definition.default_args.retries, 1);
        assert_eq!(definition.connection, "aws_default");
        assert_eq!(definition.cluster.total_instance_count(), 3);
        assert_eq!(definition.cluster.groups_with_role(InstanceRole::Core).count(), 1);
        assert_eq!(definition.job.action_on_failure, ActionOnFailure::TerminateCluster);
        assert_eq!(definition.termination, TerminationMode::AllExitPaths);
    }

    #[test]
    fn minimal_document_takes_defaults() {
        let yaml_text = r#"
workflow: nightly
cluster:
  Name: c
  ReleaseLabel: emr-6.4.0
  Instances:
    InstanceGroups:
      - InstanceRole: MASTER
        InstanceType: m5.xlarge
        InstanceCount: 1
job:
  Name: j
  HadoopJarStep:
    Jar: app.jar
"#;
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml_text).expect("parse minimal workflow");

        assert_eq!(definition.max_active_runs, 1);
        assert_eq!(definition.default_args.retry_delay, "5m");
        assert_eq!(definition.polling.cluster.poke_interval, "60s");
        assert_eq!(definition.polling.job.timeout.as_deref(), Some("7d"));
        assert_eq!(definition.connection, DEFAULT_CONNECTION);
    }

    #[test]
    fn step_sequence_is_linear() {
        assert_eq!(StepKind::CreateCluster.predecessor(), None);
        assert_eq!(StepKind::SubmitJob.predecessor(), Some(StepKind::WaitForClusterReady));
        assert_eq!(StepKind::TerminateCluster.predecessor(), Some(StepKind::WaitForJobComplete));
        assert_eq!(StepKind::SubmitJob.task_id(), "add_spark_step");
        assert!(StepKind::WaitForJobComplete.is_wait());
    }
}
