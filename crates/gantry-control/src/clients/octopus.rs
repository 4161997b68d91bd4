//! HTTP client for the Octopus Deploy REST API.

use std::time::Duration;

use async_trait::async_trait;
use gantry_command::{BuildNumber, Environment};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ReleaseClientConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentStatus, ExternalDeploymentId};

use super::{ReleaseClient, ReleaseStatus};

const SYSTEM: &str = "octopus";
const API_KEY_HEADER: &str = "x-octopus-apikey";
const RELEASE_SEARCH_DEPTH: &str = "100";

/// Paged collection wrapper used by every Octopus list endpoint.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(rename = "Items", default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "ReleaseId")]
    release_id: String,
    #[serde(rename = "TaskId")]
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct Task {
    #[serde(rename = "State")]
    state: String,
}

#[derive(Debug, Serialize)]
struct CreateDeployment<'a> {
    #[serde(rename = "ReleaseId")]
    release_id: &'a str,
    #[serde(rename = "EnvironmentId")]
    environment_id: &'a str,
    #[serde(rename = "Comments")]
    comments: String,
}

/// Dispatches and inspects deployments in one Octopus space.
///
/// Projects are matched to apps by name and environments by display name
/// (`QA`, `UAT`, `Production`). A release belongs to a build when one of
/// the dot or dash separated parts of its version equals the build number.
#[derive(Debug, Clone)]
pub struct OctopusClient {
    client: Client,
    base_url: String,
}

impl OctopusClient {
    /// Create a new Octopus client from configuration.
    pub fn new(config: &ReleaseClientConfig) -> ControlResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| ControlError::Config(format!("invalid Octopus API key: {e}")))?;
        headers.insert(API_KEY_HEADER, key);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/api/{}",
                config.url.trim_end_matches('/'),
                config.space_id
            ),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ControlResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::client(
                SYSTEM,
                format!("GET {path} failed: {}", response.status()),
            ));
        }

        response.json().await.map_err(ControlError::Http)
    }

    async fn project_id(&self, app: &str) -> ControlResult<String> {
        let page: Page<Resource> = self
            .get("/projects", &[("name", app), ("take", "1")])
            .await?;
        page.items
            .into_iter()
            .next()
            .map(|p| p.id)
            .ok_or_else(|| ControlError::client(SYSTEM, format!("no project named `{app}`")))
    }

    async fn environment_id(&self, environment: Environment) -> ControlResult<String> {
        let name = environment.display_name();
        let page: Page<Resource> = self
            .get("/environments", &[("name", name), ("take", "1")])
            .await?;
        page.items
            .into_iter()
            .next()
            .map(|e| e.id)
            .ok_or_else(|| ControlError::client(SYSTEM, format!("no environment named `{name}`")))
    }

    async fn release_for_build(&self, project_id: &str, build: BuildNumber) -> ControlResult<Release> {
        let page: Page<Release> = self
            .get(
                &format!("/projects/{project_id}/releases"),
                &[("take", RELEASE_SEARCH_DEPTH)],
            )
            .await?;
        page.items
            .into_iter()
            .find(|r| version_matches(&r.version, build))
            .ok_or_else(|| {
                ControlError::client(SYSTEM, format!("no release found for build #{build}"))
            })
    }

    async fn create_deployment(
        &self,
        app: &str,
        environment: Environment,
        build: BuildNumber,
        comments: String,
    ) -> ControlResult<ExternalDeploymentId> {
        let project_id = self.project_id(app).await?;
        let environment_id = self.environment_id(environment).await?;
        let release = self.release_for_build(&project_id, build).await?;

        let url = format!("{}/deployments", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateDeployment {
                release_id: &release.id,
                environment_id: &environment_id,
                comments,
            })
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::client(
                SYSTEM,
                format!(
                    "failed to deploy {app} {} to {environment}: {}",
                    release.version,
                    response.status()
                ),
            ));
        }

        let created: Resource = response.json().await.map_err(ControlError::Http)?;
        Ok(ExternalDeploymentId::new(created.id))
    }
}

#[async_trait]
impl ReleaseClient for OctopusClient {
    async fn deploy(
        &self,
        app: &str,
        environment: Environment,
        build: BuildNumber,
    ) -> ControlResult<ExternalDeploymentId> {
        self.create_deployment(
            app,
            environment,
            build,
            format!("Deployed via gantry: build #{build}"),
        )
        .await
    }

    async fn rollback(
        &self,
        app: &str,
        environment: Environment,
        target: BuildNumber,
    ) -> ControlResult<ExternalDeploymentId> {
        self.create_deployment(
            app,
            environment,
            target,
            format!("Rollback via gantry: reverting to build #{target}"),
        )
        .await
    }

    async fn query_status(
        &self,
        app: &str,
        environment: Environment,
    ) -> ControlResult<Option<ReleaseStatus>> {
        let project_id = self.project_id(app).await?;
        let environment_id = self.environment_id(environment).await?;

        let page: Page<Deployment> = self
            .get(
                "/deployments",
                &[
                    ("projects", project_id.as_str()),
                    ("environments", environment_id.as_str()),
                    ("take", "1"),
                ],
            )
            .await?;

        let Some(deployment) = page.items.into_iter().next() else {
            return Ok(None);
        };

        let task: Task = self
            .get(&format!("/tasks/{}", deployment.task_id), &[])
            .await?;

        Ok(Some(ReleaseStatus {
            deployment_id: ExternalDeploymentId::new(deployment.id),
            release: deployment.release_id,
            status: task_status(&task.state),
            state: task.state,
        }))
    }
}

/// Whether a release version was produced by `build`.
fn version_matches(version: &str, build: BuildNumber) -> bool {
    let wanted = build.get().to_string();
    version
        .split(['.', '-', '+'])
        .any(|part| part == wanted)
}

/// Map an Octopus task state onto the deployment lifecycle.
fn task_status(state: &str) -> DeploymentStatus {
    DeploymentStatus::from_result(state).unwrap_or(DeploymentStatus::Triggered)
}
