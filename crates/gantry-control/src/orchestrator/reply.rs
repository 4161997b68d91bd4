//! Replies returned to the chat adapter.

use std::fmt;

use gantry_command::Environment;
use serde::Serialize;

use crate::clients::ReleaseStatus;
use crate::types::{
    ActionRef, ApprovalRequest, AuditEntry, BuildRequest, DeploymentRecord,
};

/// Result of a chat command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// The build system accepted a build.
    BuildSubmitted {
        /// The tracked build.
        build: BuildRequest,
    },
    /// A deployment or rollback was dispatched.
    DeploymentTriggered {
        /// The new record.
        deployment: DeploymentRecord,
    },
    /// The action waits for an approver.
    ApprovalPending {
        /// The pending request.
        approval: ApprovalRequest,
    },
    /// Current state of an app.
    Status(StatusReport),
    /// Audit trail of an app, newest first.
    History {
        /// Application name.
        app: String,
        /// Entries, newest first.
        entries: Vec<AuditEntry>,
    },
    /// Usage text.
    Help {
        /// One usage line per command.
        text: String,
    },
}

/// Everything known about one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Application name.
    pub app: String,
    /// Most recent build, if any.
    pub latest_build: Option<BuildRequest>,
    /// One entry per environment.
    pub environments: Vec<EnvironmentStatus>,
    /// Recent builds and deployments, newest first.
    pub recent: Vec<ActionRef>,
}

/// Deployment state of an app in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentStatus {
    /// The environment.
    pub environment: Environment,
    /// Newest deployment we dispatched.
    pub latest_deployment: Option<DeploymentRecord>,
    /// Request waiting for an approver.
    pub pending_approval: Option<ApprovalRequest>,
    /// What the release system reports right now. Absent when it could not
    /// be reached.
    pub live: Option<ReleaseStatus>,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildSubmitted { build } => write!(
                f,
                "Build #{} of {} ({}) submitted",
                build.external_id, build.app, build.branch
            ),
            Self::DeploymentTriggered { deployment } => write!(
                f,
                "{} {} #{} to {}: {}",
                deployment.status,
                deployment.app,
                deployment.build,
                deployment.environment,
                deployment.external_id
            ),
            Self::ApprovalPending { approval } => write!(
                f,
                "{} {} #{} to {} is waiting for approval until {} ({})",
                approval.action,
                approval.app,
                approval.build,
                approval.environment,
                approval.expires_at.format("%H:%M UTC"),
                approval.id
            ),
            Self::Status(report) => {
                write!(f, "Status of {}", report.app)?;
                if let Some(build) = &report.latest_build {
                    write!(f, "\n  latest build #{}: {}", build.external_id, build.status)?;
                }
                for env in &report.environments {
                    write!(f, "\n  {}: ", env.environment)?;
                    match &env.latest_deployment {
                        Some(d) => write!(f, "#{} {}", d.build, d.status)?,
                        None => f.write_str("never deployed")?,
                    }
                    if let Some(live) = &env.live {
                        write!(f, " (live: {} {})", live.release, live.state)?;
                    }
                    if let Some(approval) = &env.pending_approval {
                        write!(f, ", #{} awaiting approval", approval.build)?;
                    }
                }
                Ok(())
            }
            Self::History { app, entries } => {
                write!(f, "History of {app}")?;
                if entries.is_empty() {
                    f.write_str("\n  no actions recorded")?;
                }
                for entry in entries {
                    write!(
                        f,
                        "\n  {} {} {} {}: {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        entry.actor,
                        entry.action,
                        entry.outcome,
                        entry.detail
                    )?;
                }
                Ok(())
            }
            Self::Help { text } => f.write_str(text),
        }
    }
}
