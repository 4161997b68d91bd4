//! Configuration for gantry-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use gantry_command::Environment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Longest allowed approval timeout: one week.
pub const MAX_APPROVAL_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Audit log configuration.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Approval gate configuration.
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// History query configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Build system client configuration.
    #[serde(default)]
    pub build: BuildClientConfig,

    /// Release system client configuration.
    #[serde(default)]
    pub release: ReleaseClientConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `GANTRY_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::extract(Figment::new().merge(Toml::file("control.toml")))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    fn extract(figment: Figment) -> ControlResult<Self> {
        let config: Self = figment
            .merge(Env::prefixed("GANTRY_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> ControlResult<()> {
        if self.approval.gated_environments.contains(&Environment::Qa) {
            return Err(ControlError::Config(
                "qa cannot be a gated environment".to_owned(),
            ));
        }
        if self.approval.timeout_secs == 0 {
            return Err(ControlError::Config(
                "approval.timeout_secs must be positive".to_owned(),
            ));
        }
        if self.approval.timeout_secs > MAX_APPROVAL_TIMEOUT_SECS {
            return Err(ControlError::Config(format!(
                "approval.timeout_secs must not exceed {MAX_APPROVAL_TIMEOUT_SECS}"
            )));
        }
        if self.history.page_size == 0 {
            return Err(ControlError::Config(
                "history.page_size must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

const fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8083)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/gantry".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Where audit entries are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// PostgreSQL, falling back to memory when the database is unreachable.
    #[default]
    Postgres,

    /// In-process memory only.
    Memory,
}

/// Audit log configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: AuditBackend,
}

/// Approval gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Seconds before a pending approval expires.
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,

    /// Environments that require approval before deployment.
    #[serde(default = "default_gated_environments")]
    pub gated_environments: Vec<Environment>,

    /// Resolved requests kept for lookups and late decisions.
    #[serde(default = "default_retain_resolved")]
    pub retain_resolved: usize,
}

const fn default_approval_timeout_secs() -> u64 {
    30 * 60
}

fn default_gated_environments() -> Vec<Environment> {
    vec![Environment::Uat, Environment::Production]
}

const fn default_retain_resolved() -> usize {
    crate::approval::DEFAULT_RESOLVED_RETENTION
}

impl ApprovalConfig {
    /// Approval timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
            gated_environments: default_gated_environments(),
            retain_resolved: default_retain_resolved(),
        }
    }
}

/// History query configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Entries returned by `history` and kept in the recent-action index.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

const fn default_page_size() -> usize {
    10
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// Type of build client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildClientType {
    /// Jenkins remote access API.
    Jenkins,

    /// In-process mock.
    #[default]
    Mock,
}

/// Build system client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildClientConfig {
    /// Which client to use.
    #[serde(default)]
    pub client: BuildClientType,

    /// Jenkins base URL.
    #[serde(default = "default_jenkins_url")]
    pub url: String,

    /// Jenkins user.
    #[serde(default)]
    pub user: String,

    /// Jenkins API token.
    #[serde(default)]
    pub token: String,

    /// Parameterised job that builds an app.
    #[serde(default = "default_build_job")]
    pub job: String,

    /// URL Jenkins posts build results to.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between queue item polls in milliseconds.
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// Queue item polls before giving up.
    #[serde(default = "default_queue_poll_attempts")]
    pub queue_poll_attempts: u32,
}

fn default_jenkins_url() -> String {
    "http://localhost:8080".to_owned()
}

fn default_build_job() -> String {
    "build-pipeline".to_owned()
}

fn default_callback_url() -> String {
    "http://localhost:8083/callbacks/build".to_owned()
}

const fn default_client_timeout_secs() -> u64 {
    10
}

const fn default_queue_poll_interval_ms() -> u64 {
    1000
}

const fn default_queue_poll_attempts() -> u32 {
    30
}

impl Default for BuildClientConfig {
    fn default() -> Self {
        Self {
            client: BuildClientType::default(),
            url: default_jenkins_url(),
            user: String::new(),
            token: String::new(),
            job: default_build_job(),
            callback_url: default_callback_url(),
            timeout_secs: default_client_timeout_secs(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            queue_poll_attempts: default_queue_poll_attempts(),
        }
    }
}

/// Type of release client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseClientType {
    /// Octopus Deploy REST API.
    Octopus,

    /// In-process mock.
    #[default]
    Mock,
}

/// Release system client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseClientConfig {
    /// Which client to use.
    #[serde(default)]
    pub client: ReleaseClientType,

    /// Octopus server URL.
    #[serde(default = "default_octopus_url")]
    pub url: String,

    /// Octopus API key.
    #[serde(default)]
    pub api_key: String,

    /// Octopus space.
    #[serde(default = "default_space_id")]
    pub space_id: String,

    /// Request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_octopus_url() -> String {
    "http://localhost:8081".to_owned()
}

fn default_space_id() -> String {
    "Spaces-1".to_owned()
}

impl Default for ReleaseClientConfig {
    fn default() -> Self {
        Self {
            client: ReleaseClientType::default(),
            url: default_octopus_url(),
            api_key: String::new(),
            space_id: default_space_id(),
            timeout_secs: default_client_timeout_secs(),
        }
    }
}
