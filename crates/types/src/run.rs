//! Run-level records and lifecycle events.
//!
//! The run driver emits [`RunEvent`]s over a channel while it executes and
//! returns a [`RunRecord`] once the run reaches a terminal status. Records are
//! what the history store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClusterHandle, StepHandle, StepKind};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunTrigger {
    /// Fired by the scheduler for the interval starting at `logical_date`.
    Scheduled { logical_date: DateTime<Utc> },
    /// Started on demand.
    Manual { requested_at: DateTime<Utc> },
}

impl RunTrigger {
    /// Run identifier derived from the trigger, unique per workflow.
    pub fn run_id(&self) -> String {
        match self {
            Self::Scheduled { logical_date } => format!("scheduled__{}", logical_date.to_rfc3339()),
            Self::Manual { requested_at } => format!("manual__{}", requested_at.to_rfc3339()),
        }
    }

    pub fn logical_date(&self) -> DateTime<Utc> {
        match self {
            Self::Scheduled { logical_date } => *logical_date,
            Self::Manual { requested_at } => *requested_at,
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    CancelRequested,
    Canceled,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Succeeded | Self::Failed)
    }
}

/// Status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not executed because an earlier step failed or the run was canceled.
    UpstreamFailed,
}

/// Control messages accepted by a running run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Cancel,
}

/// Which path asked for a cluster to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationSource {
    /// The workflow's own terminate step.
    WorkflowStep,
    /// The job's failure policy made the cloud service terminate the cluster.
    FailurePolicy,
    /// Cleanup after a failed or canceled run.
    Compensation,
    /// The cluster was already shutting down on its own, for example after a bootstrap failure.
    Service,
}

/// Lifecycle events streamed while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        at: DateTime<Utc>,
    },
    RunStatusChanged {
        status: RunStatus,
        message: Option<String>,
    },
    StepStarted {
        step: StepKind,
        attempt: u32,
        at: DateTime<Utc>,
    },
    StepRetrying {
        step: StepKind,
        attempt: u32,
        error: String,
        delay_ms: u64,
    },
    StepPolled {
        step: StepKind,
        poll: u32,
        state: String,
    },
    StepFinished {
        step: StepKind,
        status: RunStepStatus,
        attempts: u32,
        duration_ms: u64,
        detail: Option<String>,
    },
    ClusterTerminationRequested {
        cluster: ClusterHandle,
        source: TerminationSource,
    },
    RunCompleted {
        status: RunStatus,
        finished_at: DateTime<Utc>,
        failed_step: Option<StepKind>,
        error: Option<String>,
    },
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepKind,
    pub status: RunStepStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub detail: Option<String>,
}

impl StepRecord {
    pub fn pending(step: StepKind) -> Self {
        Self {
            step,
            status: RunStepStatus::Pending,
            attempts: 0,
            duration_ms: 0,
            detail: None,
        }
    }
}

/// Persisted summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow: String,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// First step that failed, when the run did not succeed.
    #[serde(default)]
    pub failed_step: Option<StepKind>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cluster: Option<ClusterHandle>,
    #[serde(default)]
    pub job_step: Option<StepHandle>,
    /// Whether a termination request (or a failure-policy teardown) covered the cluster.
    #[serde(default)]
    pub cluster_terminated_by: Option<TerminationSource>,
    pub steps: Vec<StepRecord>,
}

impl RunRecord {
    /// A fresh record with every step pending.
    pub fn new(workflow: impl Into<String>, trigger: RunTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: trigger.run_id(),
            workflow: workflow.into(),
            trigger,
            started_at,
            finished_at: None,
            status: RunStatus::Queued,
            failed_step: None,
            error: None,
            cluster: None,
            job_step: None,
            cluster_terminated_by: None,
            steps: StepKind::SEQUENCE.iter().copied().map(StepRecord::pending).collect(),
        }
    }

    pub fn step(&self, step: StepKind) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.step == step)
    }

    pub fn step_mut(&mut self, step: StepKind) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|record| record.step == step)
    }

    /// Marks every still-pending step as not executed.
    pub fn mark_pending_upstream_failed(&mut self) {
        for record in &mut self.steps {
            if record.status == RunStepStatus::Pending {
                record.status = RunStepStatus::UpstreamFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_ids_encode_trigger() {
        let logical_date = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        let trigger = RunTrigger::Scheduled { logical_date };
        assert_eq!(trigger.run_id(), "scheduled__2026-10-18T00:00:00+00:00");
        assert_eq!(trigger.logical_date(), logical_date);
    }

    #[test]
    fn new_record_tracks_all_steps_in_order() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        let mut record = RunRecord::new("emr", RunTrigger::Manual { requested_at: now }, now);

        let order: Vec<StepKind> = record.steps.iter().map(|step| step.step).collect();
        assert_eq!(order, StepKind::SEQUENCE.to_vec());

        record.step_mut(StepKind::CreateCluster).unwrap().status = RunStepStatus::Failed;
        record.mark_pending_upstream_failed();
        assert_eq!(record.step(StepKind::CreateCluster).unwrap().status, RunStepStatus::Failed);
        assert_eq!(
            record.step(StepKind::TerminateCluster).unwrap().status,
            RunStepStatus::UpstreamFailed
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = RunEvent::StepStarted {
            step: StepKind::SubmitJob,
            attempt: 1,
            at: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["event"], "step_started");
        assert_eq!(value["step"], "submit_job");
    }
}
