//! Batch job step descriptors submitted to a running cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Jar that lets a step run an arbitrary command such as `spark-submit`.
pub const COMMAND_RUNNER_JAR: &str = "command-runner.jar";

/// Opaque identifier for a job step accepted by a cluster (for example, `s-XYZ789`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepHandle(String);

impl StepHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One batch job submitted as a step on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpec {
    pub name: String,
    /// What the cluster service does to the cluster when this step fails.
    #[serde(default)]
    pub action_on_failure: ActionOnFailure,
    pub hadoop_jar_step: HadoopJarStep,
}

impl JobSpec {
    /// Returns true when a failure of this job makes the cloud service tear the cluster down.
    pub fn terminates_cluster_on_failure(&self) -> bool {
        self.action_on_failure.terminates_cluster()
    }

    /// Every storage location referenced by the job's argument list.
    pub fn storage_paths(&self) -> Vec<&str> {
        self.hadoop_jar_step
            .args
            .iter()
            .map(String::as_str)
            .filter(|argument| argument.contains("://"))
            .collect()
    }
}

/// Executable reference plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HadoopJarStep {
    pub jar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Failure policy attached to a job step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOnFailure {
    TerminateJobFlow,
    #[default]
    TerminateCluster,
    CancelAndWait,
    Continue,
}

impl ActionOnFailure {
    pub fn terminates_cluster(self) -> bool {
        matches!(self, Self::TerminateCluster | Self::TerminateJobFlow)
    }
}

/// Deploy mode handed to `spark-submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    #[default]
    Cluster,
    Client,
}

impl DeployMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Client => "client",
        }
    }
}

/// Builder for the `spark-submit` invocation wrapped in a command-runner step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparkSubmit {
    pub deploy_mode: DeployMode,
    pub entry_class: String,
    pub application_jar: String,
    pub application_args: Vec<String>,
}

impl SparkSubmit {
    pub fn new(entry_class: impl Into<String>, application_jar: impl Into<String>) -> Self {
        Self {
            deploy_mode: DeployMode::Cluster,
            entry_class: entry_class.into(),
            application_jar: application_jar.into(),
            application_args: Vec::new(),
        }
    }

    pub fn deploy_mode(mut self, deploy_mode: DeployMode) -> Self {
        self.deploy_mode = deploy_mode;
        self
    }

    /// Appends `--<name> <value>` to the application arguments.
    pub fn option(mut self, name: &str, value: impl Into<String>) -> Self {
        self.application_args.push(format!("--{name}"));
        self.application_args.push(value.into());
        self
    }

    /// Renders the full argument vector passed to the command runner.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "spark-submit".to_string(),
            "--deploy-mode".to_string(),
            self.deploy_mode.as_str().to_string(),
            "--class".to_string(),
            self.entry_class.clone(),
            self.application_jar.clone(),
        ];
        args.extend(self.application_args.iter().cloned());
        args
    }

    pub fn into_job_spec(self, name: impl Into<String>, action_on_failure: ActionOnFailure) -> JobSpec {
        JobSpec {
            name: name.into(),
            action_on_failure,
            hadoop_jar_step: HadoopJarStep {
                jar: COMMAND_RUNNER_JAR.to_string(),
                main_class: None,
                args: self.to_args(),
            },
        }
    }
}

/// Lifecycle states reported for a job step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    CancelPending,
    Running,
    Completed,
    Cancelled,
    Failed,
    Interrupted,
}

impl StepState {
    /// Returns true for states the step can never leave successfully.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed | Self::Interrupted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::CancelPending => "CANCEL_PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job step returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStepStatus {
    pub state: StepState,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl JobStepStatus {
    pub fn new(state: StepState) -> Self {
        Self {
            state,
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: StepState::Failed,
            failure_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spark_submit_renders_command_runner_args() {
        let job = SparkSubmit::new("com.example.MySparkApp", "s3://my-bucket/path/to/spark-job.jar")
            .option("input", "s3://my-bucket/input-data/")
            .option("output", "s3://my-bucket/output-data/")
            .into_job_spec("Run Spark Batch Job", ActionOnFailure::TerminateCluster);

        assert_eq!(job.hadoop_jar_step.jar, COMMAND_RUNNER_JAR);
        assert_eq!(
            job.hadoop_jar_step.args,
            vec![
                "spark-submit",
                "--deploy-mode",
                "cluster",
                "--class",
                "com.example.MySparkApp",
                "s3://my-bucket/path/to/spark-job.jar",
                "--input",
                "s3://my-bucket/input-data/",
                "--output",
                "s3://my-bucket/output-data/",
            ]
        );
        assert!(job.terminates_cluster_on_failure());
        assert_eq!(job.storage_paths().len(), 3);
    }

    #[test]
    fn failure_policy_wire_names() {
        let job: JobSpec = serde_json::from_value(serde_json::json!({
            "Name": "job",
            "ActionOnFailure": "CANCEL_AND_WAIT",
            "HadoopJarStep": { "Jar": "app.jar" }
        }))
        .expect("deserialize job");

        assert_eq!(job.action_on_failure, ActionOnFailure::CancelAndWait);
        assert!(!job.terminates_cluster_on_failure());
        assert!(job.hadoop_jar_step.args.is_empty());
    }

    #[test]
    fn failed_step_states() {
        assert!(StepState::Interrupted.is_failure());
        assert!(!StepState::Completed.is_failure());
        assert!(!StepState::Running.is_failure());
    }
}
