//! Workflow document loading.
//!
//! Documents are YAML or JSON files holding a single [`WorkflowDefinition`].
//! The repository's `workflows/emr_spark_job.yaml` is embedded as the builtin
//! workflow used when no file is given.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use emrflow_types::{WorkflowDefinition, definition_warnings, validate_definition};
use tracing::{info, warn};

/// The workflow shipped with the repository.
pub const BUILTIN_WORKFLOW: &str = include_str!("../../../workflows/emr_spark_job.yaml");

/// Parses a workflow document, choosing JSON or YAML from the content.
pub fn parse_workflow_str(content: &str) -> Result<WorkflowDefinition> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        bail!("workflow document is empty");
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str(content).context("failed to parse workflow document as JSON");
    }
    serde_yaml::from_str(content).context("failed to parse workflow document as YAML")
}

/// Loads a workflow file from the filesystem.
pub fn parse_workflow_file(file_path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let file_path = file_path.as_ref();
    let content =
        fs::read_to_string(file_path).with_context(|| format!("Failed to read workflow file: {}", file_path.display()))?;
    parse_workflow_str(&content).with_context(|| format!("Invalid workflow file: {}", file_path.display()))
}

/// Parses the builtin workflow.
pub fn builtin_workflow() -> Result<WorkflowDefinition> {
    parse_workflow_str(BUILTIN_WORKFLOW).context("builtin workflow is malformed")
}

/// Loads (from `path`, or the builtin workflow) and validates a definition, logging any warnings.
pub fn load_workflow(path: Option<&Path>) -> Result<WorkflowDefinition> {
    let definition = match path {
        Some(path) => parse_workflow_file(path)?,
        None => builtin_workflow()?,
    };
    validate_definition(&definition).with_context(|| format!("workflow '{}' is invalid", definition.workflow))?;
    for warning in definition_warnings(&definition) {
        warn!(workflow = %definition.workflow, "{warning}");
    }
    info!(workflow = %definition.workflow, schedule = %definition.schedule, "workflow loaded");
    Ok(definition)
}
