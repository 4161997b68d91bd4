//! In-memory correlation store.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gantry_command::Environment;

use crate::error::{ControlError, ControlResult};
use crate::types::{
    ActionRef, BuildKey, BuildRequest, BuildStatus, DeploymentRecord, DeploymentStatus,
    ExternalBuildId, ExternalDeploymentId,
};

use super::{CorrelationStore, Transition};

/// Default number of recent actions kept per app.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Correlation store backed by sharded concurrent maps.
///
/// Each map entry is updated under its shard lock, so updates to unrelated
/// keys proceed independently.
#[derive(Debug)]
pub struct MemoryStore {
    builds: DashMap<BuildKey, BuildRequest>,
    deployments: DashMap<ExternalDeploymentId, DeploymentRecord>,
    /// Latest build per app.
    latest_builds: DashMap<String, ExternalBuildId>,
    /// Deployment IDs per app/environment in dispatch order.
    targets: DashMap<(String, Environment), Vec<ExternalDeploymentId>>,
    /// Recent actions per app, newest first.
    recent: DashMap<String, VecDeque<ActionRef>>,
    history_limit: usize,
}

impl MemoryStore {
    /// Create a new empty store keeping `history_limit` recent actions per app.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            builds: DashMap::new(),
            deployments: DashMap::new(),
            latest_builds: DashMap::new(),
            targets: DashMap::new(),
            recent: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    fn record_action(&self, app: &str, action: ActionRef) {
        let mut recent = self.recent.entry(app.to_owned()).or_default();
        recent.push_front(action);
        recent.truncate(self.history_limit);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn insert_build(&self, build: BuildRequest) -> ControlResult<()> {
        let key = build.key();
        let id = build.external_id.clone();

        match self.builds.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(ControlError::internal(format!(
                    "build {key} is already tracked"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(build);
            }
        }

        self.latest_builds.insert(key.app.clone(), id.clone());
        self.record_action(&key.app, ActionRef::Build { id });
        Ok(())
    }

    async fn get_build(&self, key: &BuildKey) -> ControlResult<Option<BuildRequest>> {
        Ok(self.builds.get(key).map(|r| r.clone()))
    }

    async fn complete_build(
        &self,
        key: &BuildKey,
        status: BuildStatus,
        url: Option<String>,
    ) -> ControlResult<Transition<BuildRequest>> {
        let mut build = self
            .builds
            .get_mut(key)
            .ok_or_else(|| ControlError::not_found(format!("build {key}")))?;

        if build.status.is_terminal() || !status.is_terminal() {
            return Ok(Transition::Unchanged(build.clone()));
        }

        build.status = status;
        build.completed_at = Some(Utc::now());
        if url.is_some() {
            build.url = url;
        }
        Ok(Transition::Applied(build.clone()))
    }

    async fn latest_build(&self, app: &str) -> ControlResult<Option<BuildRequest>> {
        let Some(id) = self.latest_builds.get(app).map(|r| r.clone()) else {
            return Ok(None);
        };
        Ok(self
            .builds
            .get(&BuildKey::new(app, id))
            .map(|r| r.clone()))
    }

    async fn insert_deployment(&self, record: DeploymentRecord) -> ControlResult<()> {
        let id = record.external_id.clone();
        let target = (record.app.clone(), record.environment);

        match self.deployments.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(ControlError::internal(format!(
                    "deployment {id} is already tracked"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }

        self.targets.entry(target.clone()).or_default().push(id.clone());
        self.record_action(&target.0, ActionRef::Deployment { id });
        Ok(())
    }

    async fn get_deployment(
        &self,
        id: &ExternalDeploymentId,
    ) -> ControlResult<Option<DeploymentRecord>> {
        Ok(self.deployments.get(id).map(|r| r.clone()))
    }

    async fn update_deployment(
        &self,
        id: &ExternalDeploymentId,
        status: DeploymentStatus,
    ) -> ControlResult<Transition<DeploymentRecord>> {
        let mut record = self
            .deployments
            .get_mut(id)
            .ok_or_else(|| ControlError::not_found(format!("deployment {id}")))?;

        if record.status != DeploymentStatus::Triggered || status == DeploymentStatus::Triggered {
            return Ok(Transition::Unchanged(record.clone()));
        }

        record.status = status;
        record.updated_at = Utc::now();
        Ok(Transition::Applied(record.clone()))
    }

    async fn deployments_for(
        &self,
        app: &str,
        environment: Environment,
    ) -> ControlResult<Vec<DeploymentRecord>> {
        let ids = self
            .targets
            .get(&(app.to_owned(), environment))
            .map(|r| r.clone())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| self.deployments.get(id).map(|r| r.clone()))
            .collect())
    }

    async fn recent_actions(&self, app: &str) -> ControlResult<Vec<ActionRef>> {
        Ok(self
            .recent
            .get(app)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default())
    }
}
