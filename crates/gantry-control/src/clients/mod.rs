//! Clients for the external build and release systems.
//!
//! The orchestrator is the only caller of these traits. Implementations
//! never retry; a failed call is reported once and audited by the caller.

mod jenkins;
mod mock;
mod octopus;

pub use jenkins::JenkinsClient;
pub use mock::{MockBuildClient, MockReleaseClient, ReleaseCall};
pub use octopus::OctopusClient;

use std::sync::Arc;

use async_trait::async_trait;
use gantry_command::{BuildNumber, Environment};
use serde::Serialize;

use crate::config::{BuildClientConfig, BuildClientType, ReleaseClientConfig, ReleaseClientType};
use crate::error::ControlResult;
use crate::types::{DeploymentStatus, ExternalBuildId, ExternalDeploymentId};

/// Submits builds to the build system.
#[async_trait]
pub trait BuildClient: Send + Sync {
    /// Start a build of `branch` for `app`.
    ///
    /// Returns the identifier the build system will report in its
    /// completion callback.
    async fn submit_build(&self, app: &str, branch: &str) -> ControlResult<ExternalBuildId>;
}

/// Dispatches deployments to the release system.
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// Deploy the release built by `build` to `environment`.
    async fn deploy(
        &self,
        app: &str,
        environment: Environment,
        build: BuildNumber,
    ) -> ControlResult<ExternalDeploymentId>;

    /// Redeploy the earlier release built by `target` to `environment`.
    async fn rollback(
        &self,
        app: &str,
        environment: Environment,
        target: BuildNumber,
    ) -> ControlResult<ExternalDeploymentId>;

    /// Latest deployment the release system knows of for `app` in `environment`.
    async fn query_status(
        &self,
        app: &str,
        environment: Environment,
    ) -> ControlResult<Option<ReleaseStatus>>;
}

/// Live deployment state reported by the release system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseStatus {
    /// Release system deployment ID.
    pub deployment_id: ExternalDeploymentId,
    /// Release (version or ID) that was deployed.
    pub release: String,
    /// State as the release system names it.
    pub state: String,
    /// State mapped onto our deployment lifecycle.
    pub status: DeploymentStatus,
}

/// Create a build client from configuration.
pub fn create_build_client(config: &BuildClientConfig) -> ControlResult<Arc<dyn BuildClient>> {
    match config.client {
        BuildClientType::Jenkins => Ok(Arc::new(JenkinsClient::new(config)?)),
        BuildClientType::Mock => Ok(Arc::new(MockBuildClient::default())),
    }
}

/// Create a release client from configuration.
pub fn create_release_client(
    config: &ReleaseClientConfig,
) -> ControlResult<Arc<dyn ReleaseClient>> {
    match config.client {
        ReleaseClientType::Octopus => Ok(Arc::new(OctopusClient::new(config)?)),
        ReleaseClientType::Mock => Ok(Arc::new(MockReleaseClient::default())),
    }
}
