use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use emrflow_api::{ClusterApi, HttpClusterClient, SimulatedClusterApi};
use emrflow_engine::{RunPlan, RunRequest, Scheduler, drive_run, load_workflow, log_event};
use emrflow_types::{RunControl, RunEvent, RunRecord, RunStatus, RunTrigger, WorkflowDefinition};
use emrflow_util::{DEFAULT_RUN_HISTORY_LIMIT, JsonRunHistory, RunHistoryStore, Settings};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let settings = Settings::load().context("failed to load emrflow settings")?;

    match matches.subcommand() {
        Some(("validate", sub)) => validate_cmd(sub),
        Some(("plan", sub)) => plan_cmd(sub),
        Some(("run", sub)) => run_cmd(&settings, sub).await,
        Some(("schedule", sub)) => schedule_cmd(&settings, sub).await,
        Some(("history", sub)) => history_cmd(&settings, sub),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

fn build_cli() -> Command {
    let file = || {
        Arg::new("file")
            .long("file")
            .short('f')
            .action(ArgAction::Set)
            .value_parser(value_parser!(PathBuf))
            .help("Path to a workflow YAML/JSON document (defaults to the builtin workflow)")
    };
    let simulate = || {
        Arg::new("simulate")
            .long("simulate")
            .action(ArgAction::SetTrue)
            .help("Run against the in-process simulated cluster service")
    };
    let profile = || {
        Arg::new("profile")
            .long("profile")
            .action(ArgAction::Set)
            .help("Credential profile (overrides the settings file and the workflow connection)")
    };

    Command::new("emrflow")
        .about("Run transient-cluster batch workflows")
        .subcommand(Command::new("validate").about("Validate a workflow document").arg(file()))
        .subcommand(
            Command::new("plan")
                .about("Print the resolved step plan as JSON")
                .arg(file()),
        )
        .subcommand(
            Command::new("run")
                .about("Execute one manual run")
                .arg(file())
                .arg(simulate())
                .arg(profile())
                .arg(
                    Arg::new("fail-job")
                        .long("fail-job")
                        .action(ArgAction::SetTrue)
                        .requires("simulate")
                        .help("Make the simulated job step fail"),
                ),
        )
        .subcommand(
            Command::new("schedule")
                .about("Fire runs on the workflow's schedule")
                .arg(file())
                .arg(simulate())
                .arg(profile())
                .arg(
                    Arg::new("max-runs")
                        .long("max-runs")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(usize))
                        .help("Stop after this many runs"),
                ),
        )
        .subcommand(
            Command::new("history").about("Show recorded runs").arg(
                Arg::new("limit")
                    .long("limit")
                    .action(ArgAction::Set)
                    .value_parser(value_parser!(usize))
                    .default_value("20"),
            ),
        )
}

fn workflow_from(matches: &ArgMatches) -> Result<WorkflowDefinition> {
    let path = matches.get_one::<PathBuf>("file").map(PathBuf::as_path);
    load_workflow(path)
}

fn plan_from(matches: &ArgMatches) -> Result<RunPlan> {
    let definition = workflow_from(matches)?;
    RunPlan::resolve(definition).context("workflow cannot be planned")
}

fn validate_cmd(matches: &ArgMatches) -> Result<()> {
    let plan = plan_from(matches)?;
    println!("workflow '{}' is valid", plan.workflow_id());
    Ok(())
}

fn plan_cmd(matches: &ArgMatches) -> Result<()> {
    let plan = plan_from(matches)?;
    println!("{}", serde_json::to_string_pretty(&plan.describe())?);
    Ok(())
}

fn cluster_api(settings: &Settings, matches: &ArgMatches, definition: &WorkflowDefinition) -> Result<Arc<dyn ClusterApi>> {
    if matches.get_flag("simulate") {
        let mut simulated = SimulatedClusterApi::new();
        if matches.try_get_one::<bool>("fail-job").ok().flatten().copied().unwrap_or(false) {
            simulated = simulated.fail_job("simulated job failure");
        }
        return Ok(Arc::new(simulated));
    }

    let profile = matches
        .get_one::<String>("profile")
        .cloned()
        .or_else(|| settings.default_profile.clone())
        .unwrap_or_else(|| definition.connection.clone());
    let client = HttpClusterClient::from_settings(settings, &profile)
        .with_context(|| format!("failed to configure cluster API client for profile '{profile}'"))?;
    info!(base_url = %client.base_url(), %profile, "using cluster API");
    Ok(Arc::new(client))
}

fn history_store(settings: &Settings) -> Result<JsonRunHistory> {
    JsonRunHistory::new(settings.history_path(), DEFAULT_RUN_HISTORY_LIMIT).context("failed to open run history")
}

/// Logs every event until the sender side closes.
fn spawn_event_logger(mut event_rx: UnboundedReceiver<RunEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    })
}

/// Turns the first Ctrl-C into a cancel request.
fn spawn_cancel_on_ctrl_c(control_tx: UnboundedSender<RunControl>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; canceling");
            let _ = control_tx.send(RunControl::Cancel);
        }
    })
}

async fn run_cmd(settings: &Settings, matches: &ArgMatches) -> Result<()> {
    let plan = plan_from(matches)?;
    let api = cluster_api(settings, matches, &plan.definition)?;
    let history = history_store(settings)?;

    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, event_rx) = unbounded_channel();
    let logger = spawn_event_logger(event_rx);
    let interrupt = spawn_cancel_on_ctrl_c(control_tx);

    let request = RunRequest {
        plan,
        trigger: RunTrigger::Manual {
            requested_at: chrono::Utc::now(),
        },
    };
    let record = drive_run(request, api, control_rx, event_tx).await;
    interrupt.abort();
    let _ = logger.await;

    if let Err(error) = history.record(record.clone()) {
        warn!(%error, path = %history.path().display(), "failed to record run");
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    ensure_succeeded(&record)
}

async fn schedule_cmd(settings: &Settings, matches: &ArgMatches) -> Result<()> {
    let plan = plan_from(matches)?;
    let api = cluster_api(settings, matches, &plan.definition)?;
    let history: Arc<dyn RunHistoryStore> = Arc::new(history_store(settings)?);
    let max_runs = matches.get_one::<usize>("max-runs").copied();

    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, event_rx) = unbounded_channel();
    let logger = spawn_event_logger(event_rx);
    let interrupt = spawn_cancel_on_ctrl_c(control_tx);

    let mut scheduler = Scheduler::new(plan, api, history)
        .with_events(event_tx)
        .with_control(control_rx);
    let executed = scheduler.run(max_runs).await;
    interrupt.abort();
    drop(scheduler);
    let _ = logger.await;

    let executed = executed.context("scheduler stopped")?;
    info!(executed, "scheduler finished");
    Ok(())
}

fn history_cmd(settings: &Settings, matches: &ArgMatches) -> Result<()> {
    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(20);
    let history = history_store(settings)?;
    let records = history.recent(limit).context("failed to read run history")?;
    if records.is_empty() {
        println!("No runs recorded in {}", history.path().display());
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<10}  {:<40}  {}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", record.status).to_lowercase(),
            record.run_id,
            record
                .failed_step
                .map(|step| format!("failed at {step}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn ensure_succeeded(record: &RunRecord) -> Result<()> {
    match record.status {
        RunStatus::Succeeded => Ok(()),
        status => anyhow::bail!(
            "run {} ended {:?}{}",
            record.run_id,
            status,
            record
                .error
                .as_deref()
                .map(|error| format!(": {error}"))
                .unwrap_or_default()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn run_accepts_simulation_flags() {
        let matches = build_cli()
            .try_get_matches_from(["emrflow", "run", "--simulate", "--fail-job", "-f", "wf.yaml"])
            .expect("parse run");
        let (name, sub) = matches.subcommand().expect("subcommand");
        assert_eq!(name, "run");
        assert!(sub.get_flag("simulate"));
        assert!(sub.get_flag("fail-job"));
        assert_eq!(sub.get_one::<PathBuf>("file"), Some(&PathBuf::from("wf.yaml")));
    }

    #[test]
    fn fail_job_requires_simulation() {
        assert!(build_cli().try_get_matches_from(["emrflow", "run", "--fail-job"]).is_err());
    }
}
