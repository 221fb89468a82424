//! Structural validation of workflow definitions.
//!
//! These checks run before any cloud call is made so that an invalid document
//! never provisions a cluster. Duration strings are checked separately by the
//! engine when it resolves a run plan.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::{TerminationMode, WorkflowDefinition};
use crate::InstanceRole;

static WORKFLOW_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("workflow id regex should compile"));

/// Upper bound on declared retries; anything larger is almost certainly a typo.
pub const MAX_RETRIES: u32 = 10;

/// Reasons a workflow definition is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("invalid workflow identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("cluster must declare exactly one MASTER instance group, found {found}")]
    MasterGroupCount { found: usize },

    #[error("instance group '{group}' requests {count} instances; at least one is required")]
    EmptyInstanceGroup { group: String, count: u32 },

    #[error("cluster is termination protected; the workflow could never tear it down")]
    TerminationProtected,

    #[error("retries must be at most {max}, got {retries}")]
    TooManyRetries { retries: u32, max: u32 },

    #[error("max_active_runs must be 1; concurrent runs would share cluster lifecycles")]
    ConcurrentRuns { requested: u32 },
}

/// Validate a definition, returning the first problem found.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
    validate_identifier(&definition.workflow)?;

    require("connection", &definition.connection)?;
    require("cluster.Name", &definition.cluster.name)?;
    require("cluster.ReleaseLabel", &definition.cluster.release_label)?;
    require("job.Name", &definition.job.name)?;
    require("job.HadoopJarStep.Jar", &definition.job.hadoop_jar_step.jar)?;

    let groups = &definition.cluster.instances.instance_groups;
    if groups.is_empty() {
        return Err(DefinitionError::MissingField {
            field: "cluster.Instances.InstanceGroups".to_string(),
        });
    }
    for group in groups {
        require("cluster.Instances.InstanceGroups[].InstanceType", &group.instance_type)?;
        if group.instance_count == 0 {
            return Err(DefinitionError::EmptyInstanceGroup {
                group: group_label(&group.name, group.instance_role),
                count: group.instance_count,
            });
        }
    }
    let master_groups = definition.cluster.groups_with_role(InstanceRole::Master).count();
    if master_groups != 1 {
        return Err(DefinitionError::MasterGroupCount { found: master_groups });
    }

    if definition.cluster.instances.termination_protected {
        return Err(DefinitionError::TerminationProtected);
    }

    if definition.default_args.retries > MAX_RETRIES {
        return Err(DefinitionError::TooManyRetries {
            retries: definition.default_args.retries,
            max: MAX_RETRIES,
        });
    }

    if definition.max_active_runs != 1 {
        return Err(DefinitionError::ConcurrentRuns {
            requested: definition.max_active_runs,
        });
    }

    Ok(())
}

/// Non-fatal observations about a definition that operators usually want to know about.
pub fn definition_warnings(definition: &WorkflowDefinition) -> Vec<String> {
    let mut warnings = Vec::new();

    for path in definition.job.storage_paths() {
        if !path.starts_with("s3://") {
            warnings.push(format!("storage path '{}' is not an s3:// location", path));
        }
    }

    if !definition.cluster.instances.keep_job_flow_alive_when_no_steps {
        warnings.push(
            "KeepJobFlowAliveWhenNoSteps is false; the cluster may shut itself down before the job step is submitted"
                .to_string(),
        );
    }

    if definition.termination == TerminationMode::SuccessOnly && !definition.job.terminates_cluster_on_failure() {
        warnings.push(format!(
            "termination is success_only and ActionOnFailure is {:?}; a failed job leaves the cluster running",
            definition.job.action_on_failure
        ));
    }

    if definition.default_args.depends_on_past {
        warnings.push("depends_on_past is set; a failed run blocks every later scheduled run".to_string());
    }

    warnings
}

fn validate_identifier(identifier: &str) -> Result<(), DefinitionError> {
    if identifier.trim().is_empty() {
        return Err(DefinitionError::MissingField {
            field: "workflow".to_string(),
        });
    }
    if !WORKFLOW_ID_REGEX.is_match(identifier) {
        return Err(DefinitionError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: "use only letters, digits, dots, underscores and hyphens".to_string(),
        });
    }
    Ok(())
}

fn require(field: &str, value: &str) -> Result<(), DefinitionError> {
    if value.trim().is_empty() {
        return Err(DefinitionError::MissingField { field: field.to_string() });
    }
    Ok(())
}

fn group_label(name: &str, role: InstanceRole) -> String {
    if name.trim().is_empty() {
        format!("{:?}", role).to_uppercase()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowDefinition {
        serde_yaml::from_str(include_str!("../../../../workflows/emr_spark_job.yaml")).expect("sample workflow")
    }

    #[test]
    fn repository_sample_is_valid() {
        let definition = sample();
        assert_eq!(validate_definition(&definition), Ok(()));
        assert!(definition_warnings(&definition).is_empty());
    }

    #[test]
    fn rejects_bad_identifier() {
        let mut definition = sample();
        definition.workflow = "emr spark".into();
        assert!(matches!(
            validate_definition(&definition),
            Err(DefinitionError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn rejects_missing_master_and_empty_groups() {
        let mut definition = sample();
        definition.cluster.instances.instance_groups.remove(0);
        assert_eq!(
            validate_definition(&definition),
            Err(DefinitionError::MasterGroupCount { found: 0 })
        );

        let mut definition = sample();
        definition.cluster.instances.instance_groups[1].instance_count = 0;
        assert_eq!(
            validate_definition(&definition),
            Err(DefinitionError::EmptyInstanceGroup {
                group: "Worker nodes".into(),
                count: 0
            })
        );
    }

    #[test]
    fn rejects_termination_protection_and_concurrency() {
        let mut definition = sample();
        definition.cluster.instances.termination_protected = true;
        assert_eq!(validate_definition(&definition), Err(DefinitionError::TerminationProtected));

        let mut definition = sample();
        definition.max_active_runs = 2;
        assert_eq!(
            validate_definition(&definition),
            Err(DefinitionError::ConcurrentRuns { requested: 2 })
        );
    }

    #[test]
    fn rejects_blank_jar() {
        let mut definition = sample();
        definition.job.hadoop_jar_step.jar = "  ".into();
        assert_eq!(
            validate_definition(&definition),
            Err(DefinitionError::MissingField {
                field: "job.HadoopJarStep.Jar".into()
            })
        );
    }

    #[test]
    fn warns_about_non_storage_paths_and_self_terminating_clusters() {
        let mut definition = sample();
        definition.job.hadoop_jar_step.args.push("hdfs://namenode/output".into());
        definition.cluster.instances.keep_job_flow_alive_when_no_steps = false;

        let warnings = definition_warnings(&definition);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("hdfs://namenode/output"));
        assert!(warnings[1].contains("KeepJobFlowAliveWhenNoSteps"));
    }
}
