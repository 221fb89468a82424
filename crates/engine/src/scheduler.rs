//! Fixed-interval scheduler.
//!
//! The scheduler fires one run per elapsed schedule interval, strictly one at
//! a time, and records every finished run in the history store. The logical
//! date of a run is the start of the interval it covers; it fires once that
//! interval has closed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use emrflow_api::ClusterApi;
use emrflow_types::{RunControl, RunEvent, RunRecord, RunStatus, RunTrigger};
use emrflow_util::{DEFAULT_RUN_HISTORY_LIMIT, RunHistoryError, RunHistoryStore};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use crate::plan::RunPlan;
use crate::runner::{RunRequest, drive_run};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    History(#[from] RunHistoryError),
}

pub struct Scheduler {
    plan: RunPlan,
    api: Arc<dyn ClusterApi>,
    history: Arc<dyn RunHistoryStore>,
    start: DateTime<Utc>,
    events: Option<UnboundedSender<RunEvent>>,
    control_rx: Option<UnboundedReceiver<RunControl>>,
}

impl Scheduler {
    /// Creates a scheduler whose start date is resolved against the current time.
    pub fn new(plan: RunPlan, api: Arc<dyn ClusterApi>, history: Arc<dyn RunHistoryStore>) -> Self {
        let start = plan.definition.start_date.resolve(Utc::now());
        Self {
            plan,
            api,
            history,
            start,
            events: None,
            control_rx: None,
        }
    }

    /// Overrides the resolved start date.
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Forwards every run's events to `events`.
    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Accepts control commands; a cancel stops the active run and the scheduler.
    pub fn with_control(mut self, control_rx: UnboundedReceiver<RunControl>) -> Self {
        self.control_rx = Some(control_rx);
        self
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Logical dates that are due at `now` and have not been run yet.
    pub fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let definition = &self.plan.definition;
        let last = self.history.last_logical_date(&definition.workflow)?;
        Ok(definition
            .schedule
            .due_logical_dates(self.start, last, now, definition.catchup))
    }

    /// Executes up to `limit` due runs, one after another.
    pub async fn tick(&mut self, now: DateTime<Utc>, limit: Option<usize>) -> Result<Vec<RunRecord>, SchedulerError> {
        let mut due = self.due_runs(now)?;
        if let Some(limit) = limit {
            due.truncate(limit);
        }

        let mut records = Vec::new();
        for logical_date in due {
            if self.plan.definition.default_args.depends_on_past && !self.previous_run_succeeded()? {
                warn!(
                    workflow = %self.plan.workflow_id(),
                    %logical_date,
                    "previous scheduled run did not succeed; holding back (depends_on_past)"
                );
                break;
            }

            info!(workflow = %self.plan.workflow_id(), %logical_date, "firing scheduled run");
            let record = self.execute(RunTrigger::Scheduled { logical_date }).await;
            self.history.record(record.clone())?;
            let canceled = record.status == RunStatus::Canceled;
            records.push(record);
            if canceled {
                break;
            }
        }
        Ok(records)
    }

    /// Runs until the schedule is exhausted, `max_runs` runs finished, or a cancel arrives.
    ///
    /// Returns the number of runs executed.
    pub async fn run(&mut self, max_runs: Option<usize>) -> Result<usize, SchedulerError> {
        let mut executed = 0usize;
        info!(
            workflow = %self.plan.workflow_id(),
            schedule = %self.plan.definition.schedule,
            start = %self.start,
            "scheduler started"
        );

        loop {
            let remaining = max_runs.map(|max| max.saturating_sub(executed));
            let records = self.tick(Utc::now(), remaining).await?;
            executed += records.len();

            if records.iter().any(|record| record.status == RunStatus::Canceled) {
                info!("scheduler stopping after canceled run");
                break;
            }
            if max_runs.is_some_and(|max| executed >= max) {
                info!(executed, "scheduler reached its run limit");
                break;
            }

            let now = Utc::now();
            let Some(next_fire) = self.plan.definition.schedule.next_fire_after(self.start, now) else {
                info!("schedule exhausted");
                break;
            };
            let wait = (next_fire - now).to_std().unwrap_or_default();
            info!(next_fire = %next_fire, wait_secs = wait.as_secs(), "waiting for next scheduled run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                command = next_command(&mut self.control_rx) => match command {
                    Some(RunControl::Cancel) => {
                        info!("scheduler canceled while idle");
                        break;
                    }
                    None => self.control_rx = None,
                },
            }
        }
        Ok(executed)
    }

    async fn execute(&mut self, trigger: RunTrigger) -> RunRecord {
        let request = RunRequest {
            plan: self.plan.clone(),
            trigger,
        };
        let (control_tx, run_control_rx) = unbounded_channel();
        let event_tx = match &self.events {
            Some(events) => events.clone(),
            None => unbounded_channel().0,
        };

        let run = drive_run(request, self.api.clone(), run_control_rx, event_tx);
        tokio::pin!(run);
        loop {
            tokio::select! {
                record = &mut run => return record,
                command = next_command(&mut self.control_rx) => match command {
                    Some(command) => {
                        let _ = control_tx.send(command);
                    }
                    None => self.control_rx = None,
                },
            }
        }
    }

    fn previous_run_succeeded(&self) -> Result<bool, SchedulerError> {
        let workflow = self.plan.workflow_id();
        let previous = self
            .history
            .recent(DEFAULT_RUN_HISTORY_LIMIT)?
            .into_iter()
            .filter(|record| record.workflow == workflow)
            .filter(|record| matches!(record.trigger, RunTrigger::Scheduled { .. }))
            .max_by_key(|record| record.trigger.logical_date());
        Ok(previous.is_none_or(|record| record.status == RunStatus::Succeeded))
    }
}

async fn next_command(control_rx: &mut Option<UnboundedReceiver<RunControl>>) -> Option<RunControl> {
    match control_rx {
        Some(control_rx) => control_rx.recv().await,
        None => std::future::pending().await,
    }
}
