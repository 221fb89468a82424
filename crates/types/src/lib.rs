//! Shared type definitions for the emrflow workspace.
//!
//! - [`cluster`]: cluster provisioning request and lifecycle states
//! - [`job`]: batch job step descriptor and step states
//! - [`schedule`]: recurrence and start date
//! - [`workflow`]: the workflow definition and its fixed step sequence
//! - [`run`]: run records, events and control messages

pub mod cluster;
pub mod job;
pub mod run;
pub mod schedule;
pub mod workflow;

pub use cluster::{
    Application, ClusterHandle, ClusterSpec, ClusterState, ClusterStatus, InstanceGroup, InstanceRole, InstancesConfig, Market,
};
pub use job::{
    ActionOnFailure, COMMAND_RUNNER_JAR, DeployMode, HadoopJarStep, JobSpec, JobStepStatus, SparkSubmit, StepHandle, StepState,
};
pub use run::{RunControl, RunEvent, RunRecord, RunStatus, RunStepStatus, RunTrigger, StepRecord, TerminationSource};
pub use schedule::{Schedule, ScheduleParseError, StartDate};
pub use workflow::validation::{DefinitionError, definition_warnings, validate_definition};
pub use workflow::{
    DEFAULT_CONNECTION, DefaultArgs, PollSettings, PollingSettings, StepKind, TerminationMode, WorkflowDefinition,
};
