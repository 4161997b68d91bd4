//! Core types for gantry-control.

use std::fmt;

use chrono::{DateTime, Utc};
use gantry_command::{BuildNumber, Environment};
use serde::{Deserialize, Serialize};

/// Identifier the build system assigned to a submitted build.
///
/// Only unique per application, so it is always paired with the app name
/// in a [`BuildKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalBuildId(String);

impl ExternalBuildId {
    /// Create a new external build ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalBuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BuildNumber> for ExternalBuildId {
    fn from(build: BuildNumber) -> Self {
        Self(build.to_string())
    }
}

/// Correlation key for a build: the app it belongs to and the external ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    /// Application name.
    pub app: String,
    /// Build system identifier.
    pub id: ExternalBuildId,
}

impl BuildKey {
    /// Create a new build key.
    #[must_use]
    pub fn new(app: impl Into<String>, id: ExternalBuildId) -> Self {
        Self {
            app: app.into(),
            id,
        }
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.app, self.id)
    }
}

/// Identifier the release system assigned to a dispatched deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalDeploymentId(String);

impl ExternalDeploymentId {
    /// Create a new external deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalDeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an approval request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(String);

impl ApprovalId {
    /// Create an approval ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique approval ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Builds
// =============================================================================

/// Lifecycle of a submitted build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Accepted by the build system, not yet reported back.
    Submitted,
    /// The build system reported success.
    Succeeded,
    /// The build system reported failure, abort or instability.
    Failed,
    /// The build system reported progress or a result we do not recognise.
    /// Never stored; a build only leaves `Submitted` for a final result.
    Unknown,
}

impl BuildStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Whether no further transition may happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Map a build system result (`SUCCESS`, `FAILURE`, ...) to a status.
    #[must_use]
    pub fn from_result(result: &str) -> Self {
        match result.to_ascii_uppercase().as_str() {
            "SUCCESS" | "SUCCEEDED" => Self::Succeeded,
            "FAILURE" | "FAILED" | "ABORTED" | "UNSTABLE" | "NOT_BUILT" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A build submitted on behalf of a chat user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Application name.
    pub app: String,
    /// Source branch.
    pub branch: String,
    /// Chat user who asked for the build.
    pub requested_by: String,
    /// Identifier returned by the build system.
    pub external_id: ExternalBuildId,
    /// When the build was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the completion callback was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Link to the build, reported by the callback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Current status.
    pub status: BuildStatus,
}

impl BuildRequest {
    /// Create a build request in the submitted state.
    #[must_use]
    pub fn submitted(
        app: impl Into<String>,
        branch: impl Into<String>,
        requested_by: impl Into<String>,
        external_id: ExternalBuildId,
    ) -> Self {
        Self {
            app: app.into(),
            branch: branch.into(),
            requested_by: requested_by.into(),
            external_id,
            submitted_at: Utc::now(),
            completed_at: None,
            url: None,
            status: BuildStatus::Submitted,
        }
    }

    /// The correlation key of this build.
    #[must_use]
    pub fn key(&self) -> BuildKey {
        BuildKey::new(self.app.clone(), self.external_id.clone())
    }
}

// =============================================================================
// Approvals
// =============================================================================

/// What a gated request will do once approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    /// Deploy the named build.
    Deploy,
    /// Roll back to the named build.
    Rollback,
}

impl ApprovalAction {
    /// Get the action name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Approval lifecycle. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// Waiting for an approver.
    Pending,
    /// An approver allowed the action.
    Approved,
    /// An approver refused the action.
    Rejected,
    /// Nobody decided before the deadline.
    Expired,
}

impl ApprovalState {
    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Whether no further transition may happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An approver's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Allow the action.
    Approve,
    /// Refuse the action.
    Reject,
}

impl Decision {
    /// Get the decision name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request for a human to approve a deployment to a gated environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request identifier.
    pub id: ApprovalId,
    /// What happens on approval.
    pub action: ApprovalAction,
    /// Application name.
    pub app: String,
    /// Gated environment.
    pub environment: Environment,
    /// Build to deploy, or the release to roll back to.
    pub build: BuildNumber,
    /// Chat user who asked.
    pub requested_by: String,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request expires if nobody decides.
    pub expires_at: DateTime<Utc>,
    /// Current state.
    pub state: ApprovalState,
    /// Approver, when resolved by a person.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// When the request left `Pending`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Deployments
// =============================================================================

/// Lifecycle of a dispatched deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Handed to the release system.
    Triggered,
    /// The release system reported success.
    Succeeded,
    /// The release system reported failure.
    Failed,
    /// A rollback to an earlier release.
    RolledBack,
}

impl DeploymentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Map a release system result (`Success`, `Failed`, `TimedOut`, ...)
    /// to a final status. Non-final and unrecognised results map to `None`.
    #[must_use]
    pub fn from_result(result: &str) -> Option<Self> {
        match result.to_ascii_uppercase().as_str() {
            "SUCCESS" | "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" | "FAILURE" | "CANCELED" | "CANCELLED" | "TIMEDOUT" | "TIMED_OUT" => {
                Some(Self::Failed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A deployment dispatched to the release system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Application name.
    pub app: String,
    /// Target environment.
    pub environment: Environment,
    /// Build deployed (or rolled back to).
    pub build: BuildNumber,
    /// Chat user who triggered the deployment, or the approver.
    pub triggered_by: String,
    /// Identifier returned by the release system.
    pub external_id: ExternalDeploymentId,
    /// Approval that allowed this deployment. Always set for gated environments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    /// When the deployment was dispatched.
    pub started_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// Current status.
    pub status: DeploymentStatus,
}

impl DeploymentRecord {
    /// Create a record for a deployment that was just dispatched.
    #[must_use]
    pub fn dispatched(
        app: impl Into<String>,
        environment: Environment,
        build: BuildNumber,
        triggered_by: impl Into<String>,
        external_id: ExternalDeploymentId,
        status: DeploymentStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            app: app.into(),
            environment,
            build,
            triggered_by: triggered_by.into(),
            external_id,
            approval_id: None,
            started_at: now,
            updated_at: now,
            status,
        }
    }

    /// Attach the approval that allowed this deployment.
    #[must_use]
    pub fn with_approval(mut self, approval_id: ApprovalId) -> Self {
        self.approval_id = Some(approval_id);
        self
    }
}

// =============================================================================
// Audit
// =============================================================================

/// How an audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The command was accepted and is in progress (or waiting on approval).
    Accepted,
    /// The action completed.
    Succeeded,
    /// The action failed.
    Failed,
    /// An approver refused the action.
    Rejected,
    /// The approval deadline passed.
    Expired,
    /// A gated attempt was dropped without dispatch.
    Abandoned,
    /// A duplicate or stale event was received and not applied.
    Ignored,
}

impl AuditOutcome {
    /// Get the outcome name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Abandoned => "abandoned",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "abandoned" => Ok(Self::Abandoned),
            "ignored" => Ok(Self::Ignored),
            _ => Err(format!("unknown audit outcome: {s}")),
        }
    }
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Who caused the action (chat user, approver or `system`).
    pub actor: String,
    /// Application the action concerns. Empty for app-less commands.
    pub app: String,
    /// Action name, e.g. `build`, `deploy`, `approval.expired`.
    pub action: String,
    /// Free-form detail.
    pub detail: String,
    /// How the action ended.
    pub outcome: AuditOutcome,
}

impl AuditEntry {
    /// Actor name used for transitions nobody asked for, such as expiry.
    pub const SYSTEM_ACTOR: &'static str = "system";

    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(
        actor: impl Into<String>,
        app: impl Into<String>,
        action: impl Into<String>,
        detail: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            app: app.into(),
            action: action.into(),
            detail: detail.into(),
            outcome,
        }
    }
}

/// Reference to a past build or deployment in an app's action index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionRef {
    /// A submitted build.
    Build {
        /// Build system identifier.
        id: ExternalBuildId,
    },
    /// A dispatched deployment or rollback.
    Deployment {
        /// Release system identifier.
        id: ExternalDeploymentId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_from_result() {
        assert_eq!(BuildStatus::from_result("SUCCESS"), BuildStatus::Succeeded);
        assert_eq!(BuildStatus::from_result("failure"), BuildStatus::Failed);
        assert_eq!(BuildStatus::from_result("ABORTED"), BuildStatus::Failed);
        assert_eq!(BuildStatus::from_result("UNSTABLE"), BuildStatus::Failed);
        assert_eq!(BuildStatus::from_result("WEIRD"), BuildStatus::Unknown);
        assert!(!BuildStatus::Submitted.is_terminal());
        assert!(!BuildStatus::Unknown.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
    }

    #[test]
    fn deployment_status_from_result() {
        assert_eq!(
            DeploymentStatus::from_result("Success"),
            Some(DeploymentStatus::Succeeded)
        );
        assert_eq!(
            DeploymentStatus::from_result("TimedOut"),
            Some(DeploymentStatus::Failed)
        );
        assert_eq!(DeploymentStatus::from_result("Executing"), None);
    }

    #[test]
    fn approval_ids_are_unique() {
        let a = ApprovalId::generate();
        let b = ApprovalId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn build_key_display() {
        let key = BuildKey::new("myapp", ExternalBuildId::new("42"));
        assert_eq!(key.to_string(), "myapp#42");
    }

    #[test]
    fn audit_outcome_parse_roundtrip() {
        for outcome in [
            AuditOutcome::Accepted,
            AuditOutcome::Succeeded,
            AuditOutcome::Failed,
            AuditOutcome::Rejected,
            AuditOutcome::Expired,
            AuditOutcome::Abandoned,
            AuditOutcome::Ignored,
        ] {
            assert_eq!(outcome.as_str().parse::<AuditOutcome>(), Ok(outcome));
        }
    }
}
