//! HTTP client for the Jenkins remote access API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::BuildClientConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::ExternalBuildId;

use super::BuildClient;

const SYSTEM: &str = "jenkins";

/// Queue item as returned by `{queue item}/api/json`.
#[derive(Debug, Deserialize)]
struct QueueItem {
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    executable: Option<Executable>,
}

#[derive(Debug, Deserialize)]
struct Executable {
    number: u64,
}

/// Triggers parameterised Jenkins builds.
///
/// Jenkins answers a build request with a queue item rather than a build.
/// The client polls the queue item until Jenkins assigns a build number,
/// which is the identifier the build's completion callback will carry.
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    client: Client,
    base_url: String,
    job: String,
    user: String,
    token: String,
    callback_url: String,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl JenkinsClient {
    /// Create a new Jenkins client from configuration.
    pub fn new(config: &BuildClientConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            job: config.job.clone(),
            user: config.user.clone(),
            token: config.token.clone(),
            callback_url: config.callback_url.clone(),
            poll_interval: Duration::from_millis(config.queue_poll_interval_ms),
            poll_attempts: config.queue_poll_attempts,
        })
    }

    async fn enqueue(&self, app: &str, branch: &str) -> ControlResult<String> {
        let url = format!("{}/job/{}/buildWithParameters", self.base_url, self.job);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.token))
            .query(&[
                ("APP_NAME", app),
                ("BRANCH", branch),
                ("CALLBACK_URL", self.callback_url.as_str()),
            ])
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {}
            status => {
                return Err(ControlError::client(
                    SYSTEM,
                    format!("failed to queue {} for {app}: {status}", self.job),
                ));
            }
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ControlError::client(SYSTEM, "queue response has no Location header"))?;

        Ok(location.trim_end_matches('/').to_owned())
    }

    async fn wait_for_build(&self, queue_url: &str) -> ControlResult<u64> {
        let url = format!("{queue_url}/api/json");

        for _ in 0..self.poll_attempts {
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.user, Some(&self.token))
                .send()
                .await
                .map_err(ControlError::Http)?;

            if !response.status().is_success() {
                return Err(ControlError::client(
                    SYSTEM,
                    format!("failed to read queue item: {}", response.status()),
                ));
            }

            let item: QueueItem = response.json().await.map_err(ControlError::Http)?;
            if item.cancelled {
                return Err(ControlError::client(SYSTEM, "queued build was cancelled"));
            }
            if let Some(executable) = item.executable {
                return Ok(executable.number);
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Err(ControlError::client(
            SYSTEM,
            format!(
                "no build number assigned after {} queue polls",
                self.poll_attempts
            ),
        ))
    }
}

#[async_trait]
impl BuildClient for JenkinsClient {
    async fn submit_build(&self, app: &str, branch: &str) -> ControlResult<ExternalBuildId> {
        let queue_url = self.enqueue(app, branch).await?;
        tracing::debug!(app = %app, queue = %queue_url, "build queued");

        let number = self.wait_for_build(&queue_url).await?;
        Ok(ExternalBuildId::new(number.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    const ENQUEUE: &str = "/job/build-pipeline/buildWithParameters";
    const QUEUE_ITEM: &str = "/queue/item/7/api/json";

    fn config(url: String) -> BuildClientConfig {
        BuildClientConfig {
            url,
            user: "gantry".to_owned(),
            token: "secret".to_owned(),
            queue_poll_interval_ms: 1,
            queue_poll_attempts: 3,
            ..BuildClientConfig::default()
        }
    }

    async fn mock_enqueue(server: &mut Server) -> mockito::Mock {
        let location = format!("{}/queue/item/7/", server.url());
        server
            .mock("POST", ENQUEUE)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("APP_NAME".into(), "myapp".into()),
                Matcher::UrlEncoded("BRANCH".into(), "main".into()),
                Matcher::UrlEncoded(
                    "CALLBACK_URL".into(),
                    "http://localhost:8083/callbacks/build".into(),
                ),
            ]))
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(201)
            .with_header("location", location.as_str())
            .create_async()
            .await
    }

    #[test]
    fn new_trims_base_url() {
        let config = BuildClientConfig {
            url: "http://jenkins:8080/".to_owned(),
            ..BuildClientConfig::default()
        };
        let client = JenkinsClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://jenkins:8080");
        assert_eq!(client.job, "build-pipeline");
    }

    #[test]
    fn queue_item_parsing() {
        let waiting: QueueItem = serde_json::from_str(r#"{"why": "waiting"}"#).unwrap();
        assert!(waiting.executable.is_none());
        assert!(!waiting.cancelled);

        let started: QueueItem =
            serde_json::from_str(r#"{"executable": {"number": 42, "url": "http://ci/42/"}}"#)
                .unwrap();
        assert_eq!(started.executable.map(|e| e.number), Some(42));

        let cancelled: QueueItem = serde_json::from_str(r#"{"cancelled": true}"#).unwrap();
        assert!(cancelled.cancelled);
    }

    #[tokio::test]
    async fn submit_follows_queue_item_to_build_number() {
        let mut server = Server::new_async().await;
        let enqueue = mock_enqueue(&mut server).await;
        let waiting = server
            .mock("GET", QUEUE_ITEM)
            .with_body(r#"{"why": "Waiting for next available executor"}"#)
            .expect(1)
            .create_async()
            .await;
        let started = server
            .mock("GET", QUEUE_ITEM)
            .with_body(r#"{"executable": {"number": 42}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = JenkinsClient::new(&config(server.url())).unwrap();
        let id = client.submit_build("myapp", "main").await.unwrap();

        assert_eq!(id.as_str(), "42");
        enqueue.assert_async().await;
        waiting.assert_async().await;
        started.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_queue_item_is_a_client_error() {
        let mut server = Server::new_async().await;
        let _enqueue = mock_enqueue(&mut server).await;
        let _cancelled = server
            .mock("GET", QUEUE_ITEM)
            .with_body(r#"{"cancelled": true}"#)
            .create_async()
            .await;

        let client = JenkinsClient::new(&config(server.url())).unwrap();
        let err = client.submit_build("myapp", "main").await.unwrap_err();

        assert_eq!(err.kind(), "client");
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn gives_up_after_poll_attempts() {
        let mut server = Server::new_async().await;
        let _enqueue = mock_enqueue(&mut server).await;
        let waiting = server
            .mock("GET", QUEUE_ITEM)
            .with_body(r#"{"why": "waiting"}"#)
            .expect(3)
            .create_async()
            .await;

        let client = JenkinsClient::new(&config(server.url())).unwrap();
        let err = client.submit_build("myapp", "main").await.unwrap_err();

        assert_eq!(err.kind(), "client");
        assert!(err.to_string().contains("3 queue polls"));
        waiting.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_enqueue_does_not_poll() {
        let mut server = Server::new_async().await;
        let _enqueue = server
            .mock("POST", ENQUEUE)
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;
        let queue = server
            .mock("GET", QUEUE_ITEM)
            .expect(0)
            .create_async()
            .await;

        let client = JenkinsClient::new(&config(server.url())).unwrap();
        let err = client.submit_build("myapp", "main").await.unwrap_err();

        assert_eq!(err.kind(), "client");
        assert!(err.to_string().contains("403"));
        queue.assert_async().await;
    }

    #[tokio::test]
    async fn enqueue_without_location_is_a_client_error() {
        let mut server = Server::new_async().await;
        let _enqueue = server
            .mock("POST", ENQUEUE)
            .match_query(Matcher::Any)
            .with_status(201)
            .create_async()
            .await;

        let client = JenkinsClient::new(&config(server.url())).unwrap();
        let err = client.submit_build("myapp", "main").await.unwrap_err();

        assert!(err.to_string().contains("Location"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_client_error() {
        let config = BuildClientConfig {
            url: "http://127.0.0.1:1".to_owned(),
            timeout_secs: 1,
            ..BuildClientConfig::default()
        };
        let client = JenkinsClient::new(&config).unwrap();
        let err = client.submit_build("myapp", "main").await.unwrap_err();
        assert_eq!(err.kind(), "client");
    }
}
