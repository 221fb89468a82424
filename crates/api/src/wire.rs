//! Request and response bodies of the EMR JSON protocol.

use emrflow_types::{ClusterSpec, ClusterState, ClusterStatus, JobSpec, JobStepStatus, StepState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RunJobFlowRequest<'a> {
    #[serde(flatten)]
    pub spec: &'a ClusterSpec,
    pub visible_to_all_users: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RunJobFlowResponse {
    pub job_flow_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeClusterRequest<'a> {
    pub cluster_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeClusterResponse {
    pub cluster: ClusterBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ClusterBody {
    pub status: ClusterStatusBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ClusterStatusBody {
    pub state: ClusterState,
    #[serde(default)]
    pub state_change_reason: Option<StateChangeReason>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StateChangeReason {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StateChangeReason {
    fn render(self) -> Option<String> {
        match (self.code, self.message) {
            (Some(code), Some(message)) => Some(format!("{code}: {message}")),
            (Some(text), None) | (None, Some(text)) => Some(text),
            (None, None) => None,
        }
    }
}

impl From<ClusterStatusBody> for ClusterStatus {
    fn from(body: ClusterStatusBody) -> Self {
        ClusterStatus {
            state: body.state,
            state_change_reason: body.state_change_reason.and_then(StateChangeReason::render),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AddJobFlowStepsRequest<'a> {
    pub job_flow_id: &'a str,
    pub steps: [&'a JobSpec; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AddJobFlowStepsResponse {
    #[serde(default)]
    pub step_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeStepRequest<'a> {
    pub cluster_id: &'a str,
    pub step_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeStepResponse {
    pub step: StepBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StepBody {
    pub status: StepStatusBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StepStatusBody {
    pub state: StepState,
    #[serde(default)]
    pub failure_details: Option<FailureDetails>,
    #[serde(default)]
    pub state_change_reason: Option<StateChangeReason>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct FailureDetails {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<StepStatusBody> for JobStepStatus {
    fn from(body: StepStatusBody) -> Self {
        let failure_reason = body
            .failure_details
            .and_then(|details| details.message.or(details.reason))
            .or_else(|| body.state_change_reason.and_then(StateChangeReason::render));
        JobStepStatus {
            state: body.state,
            failure_reason,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TerminateJobFlowsRequest<'a> {
    pub job_flow_ids: [&'a str; 1],
}

/// Error payload returned by the service on non-success statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "__type", default)]
    pub kind: Option<String>,
    #[serde(alias = "Message", default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn describe(text: &str) -> String {
        match serde_json::from_str::<ErrorBody>(text) {
            Ok(ErrorBody {
                kind: Some(kind),
                message: Some(message),
            }) => format!("{}: {}", kind.rsplit('#').next().unwrap_or(&kind), message),
            Ok(ErrorBody { message: Some(message), .. }) => message,
            _ => text.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_cluster_status_with_reason() {
        let body: DescribeClusterResponse = serde_json::from_str(
            r#"{"Cluster":{"Id":"j-ABC123","Status":{"State":"TERMINATED_WITH_ERRORS",
                "StateChangeReason":{"Code":"BOOTSTRAP_FAILURE","Message":"bootstrap action 1 failed"}}}}"#,
        )
        .expect("decode cluster");
        let status = ClusterStatus::from(body.cluster.status);
        assert_eq!(status.state, ClusterState::TerminatedWithErrors);
        assert_eq!(
            status.state_change_reason.as_deref(),
            Some("BOOTSTRAP_FAILURE: bootstrap action 1 failed")
        );
    }

    #[test]
    fn decodes_step_failure_details() {
        let body: DescribeStepResponse = serde_json::from_str(
            r#"{"Step":{"Id":"s-XYZ789","Status":{"State":"FAILED",
                "FailureDetails":{"Reason":"Unknown Error.","Message":"Exception in thread main"}}}}"#,
        )
        .expect("decode step");
        let status = JobStepStatus::from(body.step.status);
        assert_eq!(status.state, StepState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some("Exception in thread main"));
    }

    #[test]
    fn describes_service_errors() {
        let text = r#"{"__type":"com.amazon#ValidationException","message":"Invalid InstanceType"}"#;
        assert_eq!(ErrorBody::describe(text), "ValidationException: Invalid InstanceType");
        assert_eq!(ErrorBody::describe("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn flattens_cluster_spec_into_run_job_flow() {
        let spec: ClusterSpec = serde_json::from_str(
            r#"{"Name":"c","ReleaseLabel":"emr-6.4.0","Instances":{"InstanceGroups":[]}}"#,
        )
        .expect("spec");
        let value = serde_json::to_value(RunJobFlowRequest {
            spec: &spec,
            visible_to_all_users: true,
        })
        .expect("encode");
        assert_eq!(value["Name"], "c");
        assert_eq!(value["VisibleToAllUsers"], true);
    }
}
