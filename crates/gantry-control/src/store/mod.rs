//! Correlation store.
//!
//! Links identifiers issued by the build and release systems back to the
//! requests this service made, so that callbacks arriving later can be
//! applied to the right record. Every operation is atomic per key.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use gantry_command::Environment;

use crate::error::ControlResult;
use crate::types::{
    ActionRef, BuildKey, BuildRequest, BuildStatus, DeploymentRecord, DeploymentStatus,
    ExternalDeploymentId,
};

/// Result of a status update that may already have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    /// The update was applied. Holds the record after the change.
    Applied(T),
    /// The record was already terminal. Holds it unchanged.
    Unchanged(T),
}

impl<T> Transition<T> {
    /// Whether the update changed anything.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The record, whichever way the update went.
    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Applied(t) | Self::Unchanged(t) => t,
        }
    }
}

/// Backend for correlation state.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Track a newly submitted build.
    ///
    /// Returns an error if the key is already tracked.
    async fn insert_build(&self, build: BuildRequest) -> ControlResult<()>;

    /// Get a build by key.
    async fn get_build(&self, key: &BuildKey) -> ControlResult<Option<BuildRequest>>;

    /// Apply a terminal status reported by the build system.
    ///
    /// Unknown keys are `NotFound`. A build that is already terminal, or a
    /// status that is not, leaves the build as it was and is returned as
    /// [`Transition::Unchanged`].
    async fn complete_build(
        &self,
        key: &BuildKey,
        status: BuildStatus,
        url: Option<String>,
    ) -> ControlResult<Transition<BuildRequest>>;

    /// The most recently submitted build of an app.
    async fn latest_build(&self, app: &str) -> ControlResult<Option<BuildRequest>>;

    /// Track a newly dispatched deployment.
    ///
    /// Returns an error if the ID is already tracked.
    async fn insert_deployment(&self, record: DeploymentRecord) -> ControlResult<()>;

    /// Get a deployment by release system ID.
    async fn get_deployment(
        &self,
        id: &ExternalDeploymentId,
    ) -> ControlResult<Option<DeploymentRecord>>;

    /// Move a triggered deployment to a terminal status.
    ///
    /// Unknown IDs are `NotFound`. Only `Triggered` records change.
    async fn update_deployment(
        &self,
        id: &ExternalDeploymentId,
        status: DeploymentStatus,
    ) -> ControlResult<Transition<DeploymentRecord>>;

    /// Deployments of an app to one environment, newest first.
    async fn deployments_for(
        &self,
        app: &str,
        environment: Environment,
    ) -> ControlResult<Vec<DeploymentRecord>>;

    /// The most recent builds and deployments of an app, newest first.
    async fn recent_actions(&self, app: &str) -> ControlResult<Vec<ActionRef>>;
}
