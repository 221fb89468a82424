//! HTTP client for an EMR-compatible cluster-management endpoint.
//!
//! Every operation is a `POST /` carrying a JSON body and an
//! `X-Amz-Target: ElasticMapReduce.<Operation>` header. Authentication is a
//! bearer token resolved from the workflow's credential profile; request
//! signing, when required, is the job of the gateway in front of the service.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use emrflow_types::{ClusterHandle, ClusterSpec, ClusterStatus, JobSpec, JobStepStatus, StepHandle};
use emrflow_util::{Settings, redact_sensitive};
use reqwest::{Client, Url, header};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, info};

use crate::credentials::resolve_profile_token;
use crate::wire::{
    AddJobFlowStepsRequest, AddJobFlowStepsResponse, DescribeClusterRequest, DescribeClusterResponse,
    DescribeStepRequest, DescribeStepResponse, ErrorBody, RunJobFlowRequest, RunJobFlowResponse,
    TerminateJobFlowsRequest,
};
use crate::{ApiError, ClusterApi};

/// Hostnames allowed to use plain HTTP for local development.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

const TARGET_PREFIX: &str = "ElasticMapReduce";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Thin wrapper around a configured `reqwest::Client` for the cluster service.
#[derive(Debug, Clone)]
pub struct HttpClusterClient {
    base_url: Url,
    http: Client,
    authorization: header::HeaderValue,
    user_agent: String,
}

impl HttpClusterClient {
    /// Build a client for `base_url` authenticating with `token`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = validate_base_url(base_url)?;

        let mut authorization = header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| ApiError::Configuration("credential token contains invalid header characters".into()))?;
        authorization.set_sensitive(true);

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(CONTENT_TYPE));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|error| ApiError::Configuration(format!("build http client: {error}")))?;

        Ok(Self {
            base_url,
            http,
            authorization,
            user_agent: format!("emrflow/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a client from operator settings and a named credential profile.
    pub fn from_settings(settings: &Settings, profile: &str) -> Result<Self, ApiError> {
        let token = resolve_profile_token(profile)?;
        Self::new(
            &settings.api_base_url,
            &token,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call<B, R>(&self, operation: &'static str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let target = format!("{TARGET_PREFIX}.{operation}");
        let payload = serde_json::to_vec(body).map_err(|error| ApiError::Decode {
            operation,
            message: format!("encode request: {error}"),
        })?;
        let request = self
            .http
            .post(self.base_url.clone())
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::AUTHORIZATION, self.authorization.clone())
            .header("X-Amz-Target", &target)
            .body(payload)
            .build()
            .map_err(|error| ApiError::Transport {
                operation,
                message: error.to_string(),
            })?;
        debug!(
            %operation,
            url = %self.base_url,
            headers = %redact_sensitive(&render_headers(request.headers())),
            "sending cluster api request"
        );

        let response = self.http.execute(request).await.map_err(|error| ApiError::Transport {
            operation,
            message: error.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|error| ApiError::Transport {
            operation,
            message: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(ApiError::Http {
                operation,
                status: status.as_u16(),
                message: redact_sensitive(&ErrorBody::describe(&text)),
            });
        }

        let body = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(body).map_err(|error| ApiError::Decode {
            operation,
            message: error.to_string(),
        })
    }
}

#[async_trait]
impl ClusterApi for HttpClusterClient {
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterHandle, ApiError> {
        let request = RunJobFlowRequest {
            spec,
            visible_to_all_users: true,
        };
        let response: RunJobFlowResponse = self.call("RunJobFlow", &request).await?;
        info!(cluster = %response.job_flow_id, name = %spec.name, "cluster creation requested");
        Ok(ClusterHandle::new(response.job_flow_id))
    }

    async fn describe_cluster(&self, cluster: &ClusterHandle) -> Result<ClusterStatus, ApiError> {
        let request = DescribeClusterRequest {
            cluster_id: cluster.as_str(),
        };
        let response: DescribeClusterResponse = self.call("DescribeCluster", &request).await?;
        Ok(response.cluster.status.into())
    }

    async fn add_job_step(&self, cluster: &ClusterHandle, job: &JobSpec) -> Result<StepHandle, ApiError> {
        let request = AddJobFlowStepsRequest {
            job_flow_id: cluster.as_str(),
            steps: [job],
        };
        let response: AddJobFlowStepsResponse = self.call("AddJobFlowSteps", &request).await?;
        let step_id = response.step_ids.into_iter().next().ok_or_else(|| ApiError::Decode {
            operation: "AddJobFlowSteps",
            message: "response did not contain any StepIds".to_string(),
        })?;
        Ok(StepHandle::new(step_id))
    }

    async fn describe_step(&self, cluster: &ClusterHandle, step: &StepHandle) -> Result<JobStepStatus, ApiError> {
        let request = DescribeStepRequest {
            cluster_id: cluster.as_str(),
            step_id: step.as_str(),
        };
        let response: DescribeStepResponse = self.call("DescribeStep", &request).await?;
        Ok(response.step.status.into())
    }

    async fn terminate_cluster(&self, cluster: &ClusterHandle) -> Result<(), ApiError> {
        let request = TerminateJobFlowsRequest {
            job_flow_ids: [cluster.as_str()],
        };
        let _: IgnoredAny = self.call("TerminateJobFlows", &request).await?;
        Ok(())
    }
}

fn render_headers(headers: &header::HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<Url, ApiError> {
    let parsed_base_url =
        Url::parse(base).map_err(|error| ApiError::Configuration(format!("invalid api base URL '{base}': {error}")))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| ApiError::Configuration(format!("api base URL '{base}' must include a host")))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(parsed_base_url);
    }

    if parsed_base_url.scheme() != "https" {
        return Err(ApiError::Configuration(format!(
            "api base URL must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        )));
    }

    Ok(parsed_base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_https_and_local_endpoints() {
        assert!(validate_base_url("https://elasticmapreduce.us-east-1.amazonaws.com").is_ok());
        assert!(validate_base_url("http://localhost:4566").is_ok());
        assert!(validate_base_url("http://127.0.0.1:4566/").is_ok());
    }

    #[test]
    fn rejects_plain_http_remote_hosts() {
        let error = validate_base_url("http://emr.example.com").expect_err("http rejected");
        assert!(error.to_string().contains("https"));
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn builds_client_with_user_agent() {
        let client =
            HttpClusterClient::new("http://localhost:4566", "token", Duration::from_secs(5)).expect("client");
        assert_eq!(client.base_url().host_str(), Some("localhost"));
        assert!(client.user_agent.starts_with("emrflow/"));
    }

    #[test]
    fn header_dump_redacts_authorization() {
        let client =
            HttpClusterClient::new("http://localhost:4566", "s3cr3t-token", Duration::from_secs(5)).expect("client");
        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, client.authorization.clone());
        headers.insert("x-amz-target", header::HeaderValue::from_static("ElasticMapReduce.DescribeCluster"));

        let logged = redact_sensitive(&render_headers(&headers));
        assert!(!logged.contains("s3cr3t-token"));
        assert!(logged.contains("x-amz-target: ElasticMapReduce.DescribeCluster"));
    }

    #[test]
    fn rejects_tokens_with_control_characters() {
        let error = HttpClusterClient::new("http://localhost:4566", "bad\ntoken", Duration::from_secs(5))
            .expect_err("newline in header");
        assert!(matches!(error, ApiError::Configuration(_)));
    }
}
