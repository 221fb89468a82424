//! # Emrflow Engine
//!
//! The engine loads workflow documents, resolves them into run plans, and
//! drives the five-step transient-cluster pipeline against a
//! [`ClusterApi`](emrflow_api::ClusterApi):
//! create the cluster, wait until it is ready, submit the job, wait for the job,
//! and terminate the cluster.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use emrflow_api::SimulatedClusterApi;
//! use emrflow_engine::{RunPlan, RunRequest, builtin_workflow, drive_run};
//! use emrflow_types::RunTrigger;
//! use tokio::sync::mpsc::unbounded_channel;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let plan = RunPlan::resolve(builtin_workflow()?)?;
//! let (_control_tx, control_rx) = unbounded_channel();
//! let (event_tx, _event_rx) = unbounded_channel();
//! let request = RunRequest {
//!     plan,
//!     trigger: RunTrigger::Manual { requested_at: chrono::Utc::now() },
//! };
//! let record = drive_run(request, Arc::new(SimulatedClusterApi::new()), control_rx, event_tx).await;
//! println!("{:?}", record.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`document`**: workflow document parsing and the builtin workflow
//! - **`plan`**: definition validation and duration resolution
//! - **`steps`**: the individual step operations and their typed outputs
//! - **`poll`** / **`retry`**: bounded, cancel-aware waiting
//! - **`termination`**: idempotent cluster teardown
//! - **`runner`**: the run driver
//! - **`scheduler`**: fixed-interval triggering with run history

mod control;

pub mod context;
pub mod document;
pub mod plan;
pub mod poll;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod steps;
pub mod termination;

pub use context::RunContext;
pub use document::{BUILTIN_WORKFLOW, builtin_workflow, load_workflow, parse_workflow_file, parse_workflow_str};
pub use plan::{PlanError, RunPlan};
pub use poll::{MAX_POLL_ATTEMPTS, PollPolicy};
pub use retry::RetryPolicy;
pub use runner::{RunRequest, drive_run, log_event};
pub use scheduler::{Scheduler, SchedulerError};
pub use steps::{CompletedJob, ProvisionedCluster, ReadyCluster, StepError, SubmittedJob};
pub use termination::{TerminationGuard, TerminationOutcome};
