//! Resolution of a workflow definition into an executable run plan.
//!
//! Duration strings are parsed once here so the run driver only deals with
//! concrete [`Duration`]s.

use std::sync::Arc;
use std::time::Duration;

use emrflow_types::{DefinitionError, PollSettings, StepKind, TerminationMode, WorkflowDefinition, validate_definition};
use emrflow_util::{DurationParseError, format_duration, parse_duration};
use indexmap::IndexMap;
use serde_json::{Value, json};
use thiserror::Error;

use crate::poll::{MAX_POLL_ATTEMPTS, PollPolicy};
use crate::retry::RetryPolicy;
use crate::steps::READY_STATES;

/// Longest accepted retry delay, poll interval or poll timeout.
pub const MAX_PLAN_DURATION: Duration = Duration::from_secs(365 * 86_400);

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("invalid duration for '{field}': {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: DurationParseError,
    },

    #[error("'{field}' must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("'{field}' must not exceed {max_days}d")]
    DurationTooLong { field: &'static str, max_days: u64 },
}

/// Everything the run driver needs, with defaults applied and durations parsed.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub definition: Arc<WorkflowDefinition>,
    pub retry: RetryPolicy,
    pub cluster_poll: PollPolicy,
    pub job_poll: PollPolicy,
    pub termination: TerminationMode,
}

impl RunPlan {
    pub fn resolve(definition: WorkflowDefinition) -> Result<Self, PlanError> {
        validate_definition(&definition)?;
        let retry = RetryPolicy {
            retries: definition.default_args.retries,
            delay: parse_field("default_args.retry_delay", &definition.default_args.retry_delay)?,
        };
        let cluster_poll = poll_policy("polling.cluster", &definition.polling.cluster)?;
        let job_poll = poll_policy("polling.job", &definition.polling.job)?;
        Ok(Self {
            retry,
            cluster_poll,
            job_poll,
            termination: definition.termination,
            definition: Arc::new(definition),
        })
    }

    pub fn workflow_id(&self) -> &str {
        &self.definition.workflow
    }

    /// Ordered, human-oriented description of the plan.
    pub fn describe(&self) -> IndexMap<&'static str, Value> {
        let definition = &self.definition;
        let steps: Vec<IndexMap<&'static str, Value>> = StepKind::SEQUENCE
            .iter()
            .map(|step| {
                let mut entry = IndexMap::new();
                entry.insert("task_id", json!(step.task_id()));
                entry.insert("description", json!(step.description()));
                entry.insert("depends_on", json!(step.predecessor().map(StepKind::task_id)));
                match step {
                    StepKind::CreateCluster => {
                        entry.insert("cluster", json!(definition.cluster.name));
                        entry.insert("release_label", json!(definition.cluster.release_label));
                        entry.insert("instances", json!(definition.cluster.total_instance_count()));
                    }
                    StepKind::WaitForClusterReady => {
                        entry.insert("ready_states", json!(READY_STATES));
                        entry.insert("poll", describe_poll(&self.cluster_poll));
                    }
                    StepKind::SubmitJob => {
                        entry.insert("job", json!(definition.job.name));
                        entry.insert("action_on_failure", json!(definition.job.action_on_failure));
                        entry.insert("args", json!(definition.job.hadoop_jar_step.args));
                    }
                    StepKind::WaitForJobComplete => {
                        entry.insert("poll", describe_poll(&self.job_poll));
                    }
                    StepKind::TerminateCluster => {
                        entry.insert("termination", json!(self.termination));
                    }
                }
                entry
            })
            .collect();

        let mut description = IndexMap::new();
        description.insert("workflow", json!(definition.workflow));
        description.insert("schedule", json!(definition.schedule.to_string()));
        description.insert("catchup", json!(definition.catchup));
        description.insert("connection", json!(definition.connection));
        description.insert("retries", json!(self.retry.retries));
        description.insert("retry_delay", json!(format_duration(self.retry.delay)));
        description.insert("termination", json!(self.termination));
        description.insert("steps", json!(steps));
        description
    }
}

fn describe_poll(policy: &PollPolicy) -> Value {
    json!({
        "interval": format_duration(policy.interval),
        "timeout": policy.timeout.map(format_duration),
        "max_attempts": policy.max_attempts,
    })
}

fn parse_field(field: &'static str, raw: &str) -> Result<Duration, PlanError> {
    let duration = parse_duration(raw).map_err(|source| PlanError::Duration { field, source })?;
    if duration > MAX_PLAN_DURATION {
        return Err(PlanError::DurationTooLong {
            field,
            max_days: MAX_PLAN_DURATION.as_secs() / 86_400,
        });
    }
    Ok(duration)
}

fn poll_policy(field: &'static str, settings: &PollSettings) -> Result<PollPolicy, PlanError> {
    let interval = parse_field(field, &settings.poke_interval)?;
    if interval.is_zero() {
        return Err(PlanError::ZeroDuration { field });
    }
    let timeout = settings
        .timeout
        .as_deref()
        .map(|raw| parse_field(field, raw))
        .transpose()?;
    Ok(PollPolicy {
        interval,
        timeout,
        max_attempts: settings.max_attempts.unwrap_or(MAX_POLL_ATTEMPTS),
    })
}
