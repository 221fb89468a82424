//! Asynchronous run driver that streams lifecycle events and responds to
//! cancel controls.
//!
//! [`drive_run`] executes the five steps strictly in order, retrying failed
//! attempts per the plan's retry policy. The caller owns the event receiver
//! and issues [`RunControl`] commands through the control channel. In
//! `all_exit_paths` mode a run that created a cluster always ends with that
//! cluster's teardown covered, whether it succeeded, failed or was canceled.

use std::sync::Arc;

use chrono::Utc;
use emrflow_api::ClusterApi;
use emrflow_types::{
    ClusterHandle, RunControl, RunEvent, RunRecord, RunStatus, RunStepStatus, RunTrigger, StepKind, TerminationMode,
    TerminationSource,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::control::ControlState;
use crate::plan::RunPlan;
use crate::steps::{self, StepError};
use crate::termination::TerminationOutcome;

/// One run to execute.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub plan: RunPlan,
    pub trigger: RunTrigger,
}

enum RunExit {
    Completed,
    Failed(StepKind, StepError),
    /// Canceled between steps (`None`) or while a step was executing.
    Canceled(Option<StepKind>),
}

/// Drives a run to completion while emitting lifecycle events.
pub async fn drive_run(
    request: RunRequest,
    api: Arc<dyn ClusterApi>,
    control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
) -> RunRecord {
    let RunRequest { plan, trigger } = request;
    let api = api.as_ref();
    let mut control = ControlState::new(control_rx, event_tx);
    let mut context = RunContext::new();
    let mut record = RunRecord::new(plan.workflow_id(), trigger, Utc::now());

    info!(run_id = %record.run_id, workflow = %record.workflow, "run started");
    control.emit(RunEvent::RunStarted {
        run_id: record.run_id.clone(),
        at: record.started_at,
    });
    record.status = RunStatus::Running;
    control.emit_status(RunStatus::Running, None);

    let mut exit = RunExit::Completed;
    for step in StepKind::SEQUENCE {
        control.drain_pending_commands();
        if control.cancel_requested() {
            exit = RunExit::Canceled(None);
            break;
        }
        match run_step(step, &plan, api, &mut context, &mut control, &mut record).await {
            Ok(()) => {}
            Err(StepError::Canceled) => {
                exit = RunExit::Canceled(Some(step));
                break;
            }
            Err(error) => {
                exit = RunExit::Failed(step, error);
                break;
            }
        }
    }

    let status = match &exit {
        RunExit::Completed => RunStatus::Succeeded,
        RunExit::Failed(step, error) => {
            record.failed_step = Some(*step);
            record.error = Some(error.to_string());
            if error.triggers_failure_policy(&plan.definition.job)
                && let Some(cluster) = context.cluster_handle()
            {
                context.termination.delegate_to_failure_policy(cluster).await;
                control.emit(RunEvent::ClusterTerminationRequested {
                    cluster: cluster.clone(),
                    source: TerminationSource::FailurePolicy,
                });
            }
            RunStatus::Failed
        }
        RunExit::Canceled(step) => {
            record.failed_step = *step;
            record.error = Some(StepError::Canceled.to_string());
            RunStatus::Canceled
        }
    };

    let needs_compensation = match &exit {
        RunExit::Completed => false,
        RunExit::Failed(step, _) => *step != StepKind::TerminateCluster,
        RunExit::Canceled(_) => true,
    };
    if needs_compensation && let Some(cluster) = context.cluster_handle().cloned() {
        match plan.termination {
            TerminationMode::AllExitPaths => compensate(api, &context, &control, &cluster, &mut record).await,
            TerminationMode::SuccessOnly => {
                if context.termination.outcome(&cluster).await.is_none() {
                    warn!(%cluster, "run ended without terminating its cluster (termination: success_only)");
                }
            }
        }
    }

    record.cluster = context.cluster_handle().cloned();
    record.job_step = context.job.as_ref().map(|job| job.step.clone());
    if let Some(cluster) = context.cluster_handle() {
        record.cluster_terminated_by = context.termination.outcome(cluster).await.map(TerminationOutcome::source);
    }
    record.mark_pending_upstream_failed();
    record.status = status;
    record.finished_at = Some(Utc::now());

    match status {
        RunStatus::Succeeded => info!(run_id = %record.run_id, "run succeeded"),
        _ => warn!(
            run_id = %record.run_id,
            ?status,
            failed_step = ?record.failed_step,
            error = record.error.as_deref().unwrap_or_default(),
            "run did not succeed"
        ),
    }
    control.emit(RunEvent::RunCompleted {
        status,
        finished_at: record.finished_at.unwrap_or_else(Utc::now),
        failed_step: record.failed_step,
        error: record.error.clone(),
    });
    record
}

/// Runs one step with retries, keeping its record and events up to date.
async fn run_step(
    step: StepKind,
    plan: &RunPlan,
    api: &dyn ClusterApi,
    context: &mut RunContext,
    control: &mut ControlState,
    record: &mut RunRecord,
) -> Result<(), StepError> {
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Some(step_record) = record.step_mut(step) {
            step_record.status = RunStepStatus::Running;
            step_record.attempts = attempt;
        }
        control.emit(RunEvent::StepStarted {
            step,
            attempt,
            at: Utc::now(),
        });
        info!(%step, attempt, "step started");

        let error = match attempt_step(step, plan, api, context, control).await {
            Ok(detail) => {
                finish_step(step, RunStepStatus::Succeeded, attempt, started, Some(detail), control, record);
                return Ok(());
            }
            Err(error) => error,
        };

        if !plan.retry.should_retry(attempt, &error) {
            warn!(%step, attempt, %error, "step failed");
            finish_step(step, RunStepStatus::Failed, attempt, started, Some(error.to_string()), control, record);
            return Err(error);
        }

        warn!(%step, attempt, %error, "step attempt failed; retrying");
        control.emit(RunEvent::StepRetrying {
            step,
            attempt,
            error: error.to_string(),
            delay_ms: plan.retry.delay.as_millis().try_into().unwrap_or(u64::MAX),
        });
        if let Err(canceled) = control.sleep(plan.retry.delay).await {
            finish_step(step, RunStepStatus::Failed, attempt, started, Some(canceled.to_string()), control, record);
            return Err(canceled);
        }
    }
}

/// One attempt of `step`. Returns a short detail for the step record.
async fn attempt_step(
    step: StepKind,
    plan: &RunPlan,
    api: &dyn ClusterApi,
    context: &mut RunContext,
    control: &mut ControlState,
) -> Result<String, StepError> {
    let missing = |needs| StepError::MissingOutput { step, needs };
    match step {
        StepKind::CreateCluster => {
            let cluster = steps::create_cluster(api, &plan.definition.cluster).await?;
            let detail = format!("cluster {}", cluster.handle);
            context.cluster = Some(cluster);
            Ok(detail)
        }
        StepKind::WaitForClusterReady => {
            let cluster = context.cluster.as_ref().ok_or_else(|| missing(StepKind::CreateCluster))?;
            let ready = steps::wait_for_cluster_ready(api, cluster, &plan.cluster_poll, control).await?;
            let detail = format!("{} after {} status checks", ready.state, ready.polls);
            context.ready = Some(ready);
            Ok(detail)
        }
        StepKind::SubmitJob => {
            let ready = context.ready.as_ref().ok_or_else(|| missing(StepKind::WaitForClusterReady))?;
            let job = steps::submit_job(api, ready, &plan.definition.job).await?;
            let detail = format!("step {}", job.step);
            context.job = Some(job);
            Ok(detail)
        }
        StepKind::WaitForJobComplete => {
            let job = context.job.as_ref().ok_or_else(|| missing(StepKind::SubmitJob))?;
            let completed = steps::wait_for_job(api, job, &plan.job_poll, control).await?;
            let detail = format!("COMPLETED after {} status checks", completed.polls);
            context.completed = Some(completed);
            Ok(detail)
        }
        StepKind::TerminateCluster => {
            if context.completed.is_none() {
                return Err(missing(StepKind::WaitForJobComplete));
            }
            let cluster = context
                .cluster_handle()
                .cloned()
                .ok_or_else(|| missing(StepKind::CreateCluster))?;
            let outcome = context
                .termination
                .ensure_terminated(api, &cluster, TerminationSource::WorkflowStep)
                .await?;
            if let TerminationOutcome::Requested(source) = outcome {
                control.emit(RunEvent::ClusterTerminationRequested { cluster, source });
            }
            Ok(outcome.describe())
        }
    }
}

async fn compensate(
    api: &dyn ClusterApi,
    context: &RunContext,
    control: &ControlState,
    cluster: &ClusterHandle,
    record: &mut RunRecord,
) {
    match context
        .termination
        .ensure_terminated(api, cluster, TerminationSource::Compensation)
        .await
    {
        Ok(TerminationOutcome::Requested(source)) => {
            info!(%cluster, "cluster terminated after unsuccessful run");
            control.emit(RunEvent::ClusterTerminationRequested {
                cluster: cluster.clone(),
                source,
            });
        }
        Ok(outcome) => info!(%cluster, detail = %outcome.describe(), "cluster teardown already covered"),
        Err(compensation_error) => {
            error!(%cluster, error = %compensation_error, "failed to terminate cluster after unsuccessful run");
            let message = format!("cluster termination failed: {compensation_error}");
            record.error = Some(match record.error.take() {
                Some(previous) => format!("{previous}; {message}"),
                None => message,
            });
        }
    }
}

fn finish_step(
    step: StepKind,
    status: RunStepStatus,
    attempts: u32,
    started: Instant,
    detail: Option<String>,
    control: &ControlState,
    record: &mut RunRecord,
) {
    let duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
    if let Some(step_record) = record.step_mut(step) {
        step_record.status = status;
        step_record.attempts = attempts;
        step_record.duration_ms = duration_ms;
        step_record.detail = detail.clone();
    }
    control.emit(RunEvent::StepFinished {
        step,
        status,
        attempts,
        duration_ms,
        detail,
    });
}

/// Writes a run event to the log.
pub fn log_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted { run_id, .. } => info!(%run_id, "run started"),
        RunEvent::RunStatusChanged { status, message } => {
            info!(?status, message = message.as_deref().unwrap_or_default(), "run status changed")
        }
        RunEvent::StepStarted { step, attempt, .. } => info!(%step, attempt, "step started"),
        RunEvent::StepRetrying {
            step,
            attempt,
            error,
            delay_ms,
        } => warn!(%step, attempt, %error, delay_ms, "step will be retried"),
        RunEvent::StepPolled { step, poll, state } => info!(%step, poll, %state, "status checked"),
        RunEvent::StepFinished {
            step,
            status,
            attempts,
            duration_ms,
            detail,
        } => info!(
            %step,
            ?status,
            attempts,
            duration_ms,
            detail = detail.as_deref().unwrap_or_default(),
            "step finished"
        ),
        RunEvent::ClusterTerminationRequested { cluster, source } => {
            info!(%cluster, ?source, "cluster termination covered")
        }
        RunEvent::RunCompleted {
            status,
            failed_step,
            error,
            ..
        } => info!(
            ?status,
            failed_step = ?failed_step,
            error = error.as_deref().unwrap_or_default(),
            "run completed"
        ),
    }
}
