//! Events consumed by the orchestrator and what handling them produced.

use gantry_command::{Command, Environment};
use serde::Serialize;

use crate::store::Transition;
use crate::types::{
    ApprovalId, ApprovalRequest, BuildRequest, BuildStatus, Decision, DeploymentRecord,
    DeploymentStatus, ExternalBuildId, ExternalDeploymentId,
};

use super::Reply;

/// Every asynchronous input the orchestrator handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A raw chat line.
    Message {
        /// Text as typed, mention markup included.
        text: String,
        /// Chat user who sent it.
        actor: String,
    },
    /// An already parsed command.
    Command {
        /// The command.
        command: Command,
        /// Chat user who sent it.
        actor: String,
    },
    /// The build system reported a finished build.
    BuildCallback {
        /// Application name.
        app: String,
        /// Build system identifier.
        build_id: ExternalBuildId,
        /// Reported result.
        status: BuildStatus,
        /// Link to the build.
        url: Option<String>,
    },
    /// The release system reported a finished deployment.
    DeploymentCallback {
        /// Release system identifier.
        deployment_id: ExternalDeploymentId,
        /// Reported result.
        status: DeploymentStatus,
    },
    /// An approver answered a pending request.
    ApprovalDecision {
        /// Application name.
        app: String,
        /// Gated environment.
        environment: Environment,
        /// Approve or reject.
        decision: Decision,
        /// Approver.
        actor: String,
        /// Request the approver saw, when the UI carries it.
        approval_id: Option<ApprovalId>,
    },
    /// The gate expired a pending request.
    ApprovalExpired(ApprovalRequest),
}

/// Result of handling one [`ControlEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventOutcome {
    /// A command was handled.
    Reply {
        /// Reply for the chat user.
        reply: Reply,
    },
    /// A build callback was applied or ignored.
    Build {
        /// Whether the status changed.
        applied: bool,
        /// The build after the callback.
        build: BuildRequest,
    },
    /// A deployment callback was applied or ignored.
    Deployment {
        /// Whether the status changed.
        applied: bool,
        /// The deployment after the callback.
        deployment: DeploymentRecord,
    },
    /// An approval decision was applied.
    Decision(DecisionOutcome),
    /// An expired request's attempt was abandoned.
    Abandoned {
        /// The expired request.
        approval: ApprovalRequest,
    },
}

impl EventOutcome {
    pub(crate) fn build(transition: Transition<BuildRequest>) -> Self {
        Self::Build {
            applied: transition.is_applied(),
            build: transition.into_inner(),
        }
    }

    pub(crate) fn deployment(transition: Transition<DeploymentRecord>) -> Self {
        Self::Deployment {
            applied: transition.is_applied(),
            deployment: transition.into_inner(),
        }
    }
}

/// What an approval decision led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    /// The resolved request.
    pub approval: ApprovalRequest,
    /// Whether the approved action reached the release system.
    pub dispatch: DispatchOutcome,
}

/// Dispatch step that follows an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The release system accepted the deployment.
    Dispatched {
        /// The new record.
        deployment: DeploymentRecord,
    },
    /// The release system refused. The approval stands.
    Failed {
        /// Error reported by the release client.
        error: String,
    },
    /// The request was rejected, nothing to dispatch.
    NotDispatched,
}
