//! In-process build and release clients for tests and local development.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use gantry_command::{BuildNumber, Environment};

use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentStatus, ExternalBuildId, ExternalDeploymentId};

use super::{BuildClient, ReleaseClient, ReleaseStatus};

/// Build client that hands out sequential build numbers.
#[derive(Debug)]
pub struct MockBuildClient {
    next: AtomicU64,
    failing: AtomicBool,
    submitted: RwLock<Vec<(String, String)>>,
}

impl MockBuildClient {
    /// Create a client whose first build number is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            failing: AtomicBool::new(false),
            submitted: RwLock::new(Vec::new()),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(app, branch)` of every accepted submission, oldest first.
    pub fn submitted(&self) -> ControlResult<Vec<(String, String)>> {
        let submitted = self
            .submitted
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(submitted.clone())
    }
}

impl Default for MockBuildClient {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[async_trait]
impl BuildClient for MockBuildClient {
    async fn submit_build(&self, app: &str, branch: &str) -> ControlResult<ExternalBuildId> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlError::client("mock-build", "build system unavailable"));
        }

        let number = self.next.fetch_add(1, Ordering::SeqCst);
        let mut submitted = self
            .submitted
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        submitted.push((app.to_owned(), branch.to_owned()));

        Ok(ExternalBuildId::new(number.to_string()))
    }
}

/// A call accepted by [`MockReleaseClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseCall {
    /// `deploy(app, environment, build)`.
    Deploy {
        /// Application name.
        app: String,
        /// Target environment.
        environment: Environment,
        /// Build deployed.
        build: BuildNumber,
        /// ID handed back.
        id: ExternalDeploymentId,
    },
    /// `rollback(app, environment, target)`.
    Rollback {
        /// Application name.
        app: String,
        /// Target environment.
        environment: Environment,
        /// Build rolled back to.
        target: BuildNumber,
        /// ID handed back.
        id: ExternalDeploymentId,
    },
}

impl ReleaseCall {
    fn matches(&self, wanted_app: &str, wanted_env: Environment) -> bool {
        match self {
            Self::Deploy {
                app, environment, ..
            }
            | Self::Rollback {
                app, environment, ..
            } => app == wanted_app && *environment == wanted_env,
        }
    }

    fn status(&self) -> ReleaseStatus {
        let (id, build) = match self {
            Self::Deploy { id, build, .. } => (id, build),
            Self::Rollback { id, target, .. } => (id, target),
        };
        ReleaseStatus {
            deployment_id: id.clone(),
            release: build.to_string(),
            state: "Executing".to_owned(),
            status: DeploymentStatus::Triggered,
        }
    }
}

/// Release client that records calls instead of deploying anything.
#[derive(Debug, Default)]
pub struct MockReleaseClient {
    next: AtomicU64,
    failing: AtomicBool,
    calls: RwLock<Vec<ReleaseCall>>,
}

impl MockReleaseClient {
    /// Create a new mock release client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every accepted call, oldest first.
    pub fn calls(&self) -> ControlResult<Vec<ReleaseCall>> {
        let calls = self
            .calls
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(calls.clone())
    }

    fn check(&self) -> ControlResult<ExternalDeploymentId> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlError::client("mock-release", "release system unavailable"));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ExternalDeploymentId::new(format!("Deployments-{n}")))
    }

    fn record(&self, call: ReleaseCall) -> ControlResult<()> {
        let mut calls = self
            .calls
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl ReleaseClient for MockReleaseClient {
    async fn deploy(
        &self,
        app: &str,
        environment: Environment,
        build: BuildNumber,
    ) -> ControlResult<ExternalDeploymentId> {
        let id = self.check()?;
        self.record(ReleaseCall::Deploy {
            app: app.to_owned(),
            environment,
            build,
            id: id.clone(),
        })?;
        Ok(id)
    }

    async fn rollback(
        &self,
        app: &str,
        environment: Environment,
        target: BuildNumber,
    ) -> ControlResult<ExternalDeploymentId> {
        let id = self.check()?;
        self.record(ReleaseCall::Rollback {
            app: app.to_owned(),
            environment,
            target,
            id: id.clone(),
        })?;
        Ok(id)
    }

    async fn query_status(
        &self,
        app: &str,
        environment: Environment,
    ) -> ControlResult<Option<ReleaseStatus>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlError::client("mock-release", "release system unavailable"));
        }
        let calls = self
            .calls
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(calls
            .iter()
            .rev()
            .find(|c| c.matches(app, environment))
            .map(ReleaseCall::status))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_numbers_are_sequential() {
        let client = MockBuildClient::starting_at(42);
        let first = client.submit_build("myapp", "main").await.unwrap();
        let second = client.submit_build("myapp", "dev").await.unwrap();
        assert_eq!(first.as_str(), "42");
        assert_eq!(second.as_str(), "43");
        assert_eq!(client.submitted().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failing_build_client_records_nothing() {
        let client = MockBuildClient::default();
        client.set_failing(true);
        let err = client.submit_build("myapp", "main").await.unwrap_err();
        assert_eq!(err.kind(), "client");
        assert!(client.submitted().unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_status_reflects_latest_call() {
        let client = MockReleaseClient::new();
        let build = BuildNumber::new(41).unwrap();
        client.deploy("myapp", Environment::Qa, build).await.unwrap();
        let rollback = client
            .rollback("myapp", Environment::Qa, build)
            .await
            .unwrap();

        let status = client
            .query_status("myapp", Environment::Qa)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.deployment_id, rollback);
        assert!(client
            .query_status("myapp", Environment::Uat)
            .await
            .unwrap()
            .is_none());
    }
}
