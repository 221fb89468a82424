//! Cluster-management API client library.
//!
//! This crate exposes the five cloud operations a run needs behind the
//! [`ClusterApi`] trait:
//!
//! - provision a cluster from a [`ClusterSpec`]
//! - query cluster status
//! - add a job step to a running cluster
//! - query job step status
//! - terminate a cluster
//!
//! [`HttpClusterClient`] speaks the EMR JSON protocol against a configured
//! endpoint. [`SimulatedClusterApi`] is a deterministic in-process backend used
//! by tests and by `emrflow run --simulate`.

pub mod client;
pub mod credentials;
pub mod simulated;
mod wire;

use async_trait::async_trait;
use emrflow_types::{ClusterHandle, ClusterSpec, ClusterStatus, JobSpec, JobStepStatus, StepHandle};
use thiserror::Error;

pub use client::HttpClusterClient;
pub use credentials::{CREDENTIAL_SERVICE, resolve_profile_token};
pub use simulated::{ApiCall, SimulatedClusterApi};

/// Errors raised by cluster API backends.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("transport error calling {operation}: {message}")]
    Transport { operation: &'static str, message: String },

    /// The service answered with a non-success status.
    #[error("{operation} failed with HTTP {status}: {message}")]
    Http {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("could not decode {operation} response: {message}")]
    Decode { operation: &'static str, message: String },

    #[error("no credentials for profile '{profile}': {message}")]
    Credentials { profile: String, message: String },

    #[error("invalid endpoint configuration: {0}")]
    Configuration(String),

    #[error("unknown cluster '{0}'")]
    UnknownCluster(ClusterHandle),

    #[error("unknown step '{step}' on cluster '{cluster}'")]
    UnknownStep { cluster: ClusterHandle, step: StepHandle },
}

impl ApiError {
    /// Whether repeating the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// The cloud operations needed to drive one transient-cluster run.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a provisioning request and return the new cluster's handle.
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterHandle, ApiError>;

    async fn describe_cluster(&self, cluster: &ClusterHandle) -> Result<ClusterStatus, ApiError>;

    /// Add a job step and return the handle of the first accepted step.
    async fn add_job_step(&self, cluster: &ClusterHandle, job: &JobSpec) -> Result<StepHandle, ApiError>;

    async fn describe_step(&self, cluster: &ClusterHandle, step: &StepHandle) -> Result<JobStepStatus, ApiError>;

    /// Request teardown. The service acknowledges asynchronously.
    async fn terminate_cluster(&self, cluster: &ClusterHandle) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_failures() {
        let throttled = ApiError::Http {
            operation: "DescribeCluster",
            status: 429,
            message: "Rate exceeded".into(),
        };
        let rejected = ApiError::Http {
            operation: "RunJobFlow",
            status: 400,
            message: "ValidationException".into(),
        };
        assert!(throttled.is_transient());
        assert!(!rejected.is_transient());
        assert!(!ApiError::UnknownCluster(ClusterHandle::new("j-1")).is_transient());
    }
}
