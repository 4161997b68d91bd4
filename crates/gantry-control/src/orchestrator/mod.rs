//! Command and callback dispatcher.
//!
//! The orchestrator is the single entry point for chat commands, build and
//! deployment callbacks, approval decisions and approval expiries, and the
//! only caller of the external build and release clients. External calls
//! complete before any state they produce is written, and no store or gate
//! lock is held across them.

mod events;
mod reply;

pub use events::{ControlEvent, DecisionOutcome, DispatchOutcome, EventOutcome};
pub use reply::{EnvironmentStatus, Reply, StatusReport};

use std::sync::Arc;

use gantry_command::{BuildNumber, Command, Environment};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalGate, GateEvent};
use crate::audit::AuditLog;
use crate::clients::{BuildClient, ReleaseClient};
use crate::error::{ControlError, ControlResult};
use crate::store::{CorrelationStore, Transition};
use crate::types::{
    ApprovalAction, ApprovalId, ApprovalRequest, ApprovalState, AuditEntry, AuditOutcome,
    BuildKey, BuildRequest, BuildStatus, Decision, DeploymentRecord, DeploymentStatus,
    ExternalBuildId, ExternalDeploymentId,
};

/// Actor recorded for build system callbacks.
pub const BUILD_SYSTEM_ACTOR: &str = "build-system";

/// Actor recorded for release system callbacks.
pub const RELEASE_SYSTEM_ACTOR: &str = "release-system";

/// Coordinates commands, callbacks and approvals.
pub struct Orchestrator {
    store: Arc<dyn CorrelationStore>,
    gate: Arc<ApprovalGate>,
    audit: Arc<dyn AuditLog>,
    builds: Arc<dyn BuildClient>,
    releases: Arc<dyn ReleaseClient>,
    history_limit: usize,
}

impl Orchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn CorrelationStore>,
        gate: Arc<ApprovalGate>,
        audit: Arc<dyn AuditLog>,
        builds: Arc<dyn BuildClient>,
        releases: Arc<dyn ReleaseClient>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            gate,
            audit,
            builds,
            releases,
            history_limit,
        }
    }

    /// The approval gate this orchestrator consults.
    #[must_use]
    pub const fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    /// Look up a dispatched deployment or rollback by release system ID.
    pub async fn deployment(&self, id: &ExternalDeploymentId) -> ControlResult<DeploymentRecord> {
        self.store
            .get_deployment(id)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("deployment {id}")))
    }

    /// Handle any event.
    pub async fn dispatch(&self, event: ControlEvent) -> ControlResult<EventOutcome> {
        match event {
            ControlEvent::Message { text, actor } => {
                let reply = self.handle_message(&text, &actor).await?;
                Ok(EventOutcome::Reply { reply })
            }
            ControlEvent::Command { command, actor } => {
                let reply = self.handle_command(command, &actor).await?;
                Ok(EventOutcome::Reply { reply })
            }
            ControlEvent::BuildCallback {
                app,
                build_id,
                status,
                url,
            } => self
                .handle_build_callback(&app, build_id, status, url)
                .await
                .map(EventOutcome::build),
            ControlEvent::DeploymentCallback {
                deployment_id,
                status,
            } => self
                .handle_deployment_callback(&deployment_id, status)
                .await
                .map(EventOutcome::deployment),
            ControlEvent::ApprovalDecision {
                app,
                environment,
                decision,
                actor,
                approval_id,
            } => self
                .handle_approval_decision(&app, environment, decision, &actor, approval_id.as_ref())
                .await
                .map(EventOutcome::Decision),
            ControlEvent::ApprovalExpired(approval) => {
                self.handle_approval_expiry(&approval).await?;
                Ok(EventOutcome::Abandoned { approval })
            }
        }
    }

    /// Feed gate expiries into [`dispatch`](Self::dispatch) until cancelled.
    pub async fn run_gate_listener(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<GateEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(GateEvent::Expired(approval)) = event else {
                        break;
                    };
                    let id = approval.id.clone();
                    if let Err(e) = self.dispatch(ControlEvent::ApprovalExpired(approval)).await {
                        tracing::error!(approval_id = %id, error = %e, "failed to handle approval expiry");
                    }
                }
            }
        }
        tracing::debug!("gate listener stopped");
    }

    /// Parse a chat line and handle the command.
    ///
    /// A line that does not parse is audited and returned as `Parse`.
    pub async fn handle_message(&self, text: &str, actor: &str) -> ControlResult<Reply> {
        match gantry_command::parse(text) {
            Ok(command) => self.handle_command(command, actor).await,
            Err(e) => {
                tracing::debug!(actor = %actor, error = %e, "unparseable command");
                self.refuse(
                    AuditEntry::new(
                        actor,
                        "",
                        "parse",
                        format!("`{}`: {e}", text.trim()),
                        AuditOutcome::Failed,
                    ),
                    e.into(),
                )
                .await
            }
        }
    }

    /// Handle a parsed command.
    pub async fn handle_command(&self, command: Command, actor: &str) -> ControlResult<Reply> {
        match command {
            Command::Build { app, branch } => self.build(&app, &branch, actor).await,
            Command::Deploy {
                app,
                build,
                environment,
            } => self.deploy(&app, build, environment, actor).await,
            Command::Rollback { app, environment } => {
                self.rollback(&app, environment, actor).await
            }
            Command::Status { app } => self.status(&app, actor).await,
            Command::History { app } => self.history(&app, actor).await,
            Command::Help => {
                self.audit
                    .append(AuditEntry::new(actor, "", "help", "", AuditOutcome::Succeeded))
                    .await?;
                Ok(Reply::Help {
                    text: Command::help_text(),
                })
            }
        }
    }

    /// Apply a build system result to the build it belongs to.
    ///
    /// Repeat deliveries and progress reports are audited as ignored and
    /// return [`Transition::Unchanged`].
    pub async fn handle_build_callback(
        &self,
        app: &str,
        build_id: ExternalBuildId,
        status: BuildStatus,
        url: Option<String>,
    ) -> ControlResult<Transition<BuildRequest>> {
        let key = BuildKey::new(app, build_id);

        let transition = match self.store.complete_build(&key, status, url).await {
            Ok(transition) => transition,
            Err(e) => {
                tracing::warn!(build = %key, error = %e, "build callback for untracked build");
                return self
                    .refuse(
                        AuditEntry::new(
                            BUILD_SYSTEM_ACTOR,
                            app,
                            "build.callback",
                            format!("#{}: {e}", key.id),
                            AuditOutcome::Failed,
                        ),
                        e,
                    )
                    .await;
            }
        };

        let entry = match &transition {
            Transition::Applied(build) => {
                tracing::info!(build = %key, status = %build.status, "build completed");
                let outcome = match build.status {
                    BuildStatus::Succeeded => AuditOutcome::Succeeded,
                    _ => AuditOutcome::Failed,
                };
                AuditEntry::new(
                    BUILD_SYSTEM_ACTOR,
                    app,
                    "build.callback",
                    format!("#{} {} ({})", key.id, build.status, build.branch),
                    outcome,
                )
            }
            Transition::Unchanged(build) if build.status.is_terminal() => {
                tracing::info!(build = %key, "duplicate build callback ignored");
                AuditEntry::new(
                    BUILD_SYSTEM_ACTOR,
                    app,
                    "build.callback",
                    format!("#{} already {}, reported {status}", key.id, build.status),
                    AuditOutcome::Ignored,
                )
            }
            Transition::Unchanged(build) => {
                tracing::debug!(build = %key, "non-final build report ignored");
                AuditEntry::new(
                    BUILD_SYSTEM_ACTOR,
                    app,
                    "build.callback",
                    format!("#{} still {}, reported {status}", key.id, build.status),
                    AuditOutcome::Ignored,
                )
            }
        };
        self.audit.append(entry).await?;

        Ok(transition)
    }

    /// Apply a release system result to the deployment it belongs to.
    pub async fn handle_deployment_callback(
        &self,
        deployment_id: &ExternalDeploymentId,
        status: DeploymentStatus,
    ) -> ControlResult<Transition<DeploymentRecord>> {
        let transition = match self.store.update_deployment(deployment_id, status).await {
            Ok(transition) => transition,
            Err(e) => {
                tracing::warn!(deployment = %deployment_id, error = %e, "deployment callback for untracked deployment");
                return self
                    .refuse(
                        AuditEntry::new(
                            RELEASE_SYSTEM_ACTOR,
                            "",
                            "deploy.callback",
                            format!("{deployment_id}: {e}"),
                            AuditOutcome::Failed,
                        ),
                        e,
                    )
                    .await;
            }
        };

        let record = match &transition {
            Transition::Applied(record) | Transition::Unchanged(record) => record,
        };
        let (outcome, detail) = match &transition {
            Transition::Applied(_) => {
                tracing::info!(deployment = %deployment_id, status = %record.status, "deployment completed");
                let outcome = if record.status == DeploymentStatus::Succeeded {
                    AuditOutcome::Succeeded
                } else {
                    AuditOutcome::Failed
                };
                (
                    outcome,
                    format!(
                        "{deployment_id} #{} to {} {}",
                        record.build, record.environment, record.status
                    ),
                )
            }
            Transition::Unchanged(_) => (
                AuditOutcome::Ignored,
                format!(
                    "{deployment_id} already {}, reported {status}",
                    record.status
                ),
            ),
        };
        self.audit
            .append(AuditEntry::new(
                RELEASE_SYSTEM_ACTOR,
                &record.app,
                "deploy.callback",
                detail,
                outcome,
            ))
            .await?;

        Ok(transition)
    }

    /// Resolve a pending approval and, when approved, dispatch its action.
    ///
    /// Dispatch is a separate step: a release system failure is returned as
    /// [`DispatchOutcome::Failed`] and leaves the approval in place.
    pub async fn handle_approval_decision(
        &self,
        app: &str,
        environment: Environment,
        decision: Decision,
        actor: &str,
        approval_id: Option<&ApprovalId>,
    ) -> ControlResult<DecisionOutcome> {
        let approval = match self
            .gate
            .resolve(app, environment, decision, actor, approval_id)
            .await
        {
            Ok(approval) => approval,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::info!(app = %app, environment = %environment, error = %e, "approval decision refused");
                return self
                    .refuse(
                        AuditEntry::new(
                            actor,
                            app,
                            format!("approval.{decision}"),
                            format!("{environment}: {e}"),
                            AuditOutcome::Failed,
                        ),
                        e,
                    )
                    .await;
            }
        };

        let dispatch = if approval.state == ApprovalState::Approved {
            self.dispatch_approved(&approval, actor).await?
        } else {
            DispatchOutcome::NotDispatched
        };

        Ok(DecisionOutcome { approval, dispatch })
    }

    /// Record that an expired request's action will never run.
    pub async fn handle_approval_expiry(&self, approval: &ApprovalRequest) -> ControlResult<()> {
        tracing::info!(
            app = %approval.app,
            environment = %approval.environment,
            approval_id = %approval.id,
            "deployment abandoned after approval expiry"
        );
        self.audit
            .append(AuditEntry::new(
                AuditEntry::SYSTEM_ACTOR,
                &approval.app,
                approval.action.as_str(),
                format!(
                    "#{} to {} abandoned, approval {} expired",
                    approval.build, approval.environment, approval.id
                ),
                AuditOutcome::Abandoned,
            ))
            .await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn build(&self, app: &str, branch: &str, actor: &str) -> ControlResult<Reply> {
        let build_id = match self.builds.submit_build(app, branch).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(app = %app, branch = %branch, error = %e, "build submission failed");
                return self
                    .refuse(
                        AuditEntry::new(actor, app, "build", format!("{branch}: {e}"), AuditOutcome::Failed),
                        e,
                    )
                    .await;
            }
        };

        let build = BuildRequest::submitted(app, branch, actor, build_id);
        if let Err(e) = self.store.insert_build(build.clone()).await {
            return self
                .refuse(
                    AuditEntry::new(actor, app, "build", format!("{branch}: {e}"), AuditOutcome::Failed),
                    e,
                )
                .await;
        }

        tracing::info!(app = %app, branch = %branch, build = %build.external_id, "build submitted");
        self.audit
            .append(AuditEntry::new(
                actor,
                app,
                "build",
                format!("{branch} submitted as #{}", build.external_id),
                AuditOutcome::Accepted,
            ))
            .await?;

        Ok(Reply::BuildSubmitted { build })
    }

    async fn deploy(
        &self,
        app: &str,
        build: BuildNumber,
        environment: Environment,
        actor: &str,
    ) -> ControlResult<Reply> {
        if self.gate.is_gated(environment) {
            return self
                .request_approval(ApprovalAction::Deploy, app, environment, build, actor)
                .await;
        }

        let deployment = self
            .dispatch_release(ApprovalAction::Deploy, app, environment, build, actor, None)
            .await?;
        Ok(Reply::DeploymentTriggered { deployment })
    }

    async fn rollback(&self, app: &str, environment: Environment, actor: &str) -> ControlResult<Reply> {
        let target = match self.rollback_target(app, environment).await {
            Ok(target) => target,
            Err(e) => {
                return self
                    .refuse(
                        AuditEntry::new(actor, app, "rollback", format!("{environment}: {e}"), AuditOutcome::Failed),
                        e,
                    )
                    .await;
            }
        };

        if self.gate.is_gated(environment) {
            return self
                .request_approval(ApprovalAction::Rollback, app, environment, target, actor)
                .await;
        }

        let deployment = self
            .dispatch_release(ApprovalAction::Rollback, app, environment, target, actor, None)
            .await?;
        Ok(Reply::DeploymentTriggered { deployment })
    }

    async fn status(&self, app: &str, actor: &str) -> ControlResult<Reply> {
        let latest_build = self.store.latest_build(app).await?;
        let recent = self.store.recent_actions(app).await?;

        let mut environments = Vec::with_capacity(Environment::ALL.len());
        for environment in Environment::ALL {
            let latest_deployment = self
                .store
                .deployments_for(app, environment)
                .await?
                .into_iter()
                .next();
            let live = match self.releases.query_status(app, environment).await {
                Ok(live) => live,
                Err(e) => {
                    tracing::warn!(app = %app, environment = %environment, error = %e, "live status unavailable");
                    None
                }
            };
            environments.push(EnvironmentStatus {
                environment,
                latest_deployment,
                pending_approval: self.gate.pending_for(app, environment),
                live,
            });
        }

        self.audit
            .append(AuditEntry::new(actor, app, "status", "", AuditOutcome::Succeeded))
            .await?;

        Ok(Reply::Status(StatusReport {
            app: app.to_owned(),
            latest_build,
            environments,
            recent,
        }))
    }

    async fn history(&self, app: &str, actor: &str) -> ControlResult<Reply> {
        let entries = self.audit.history(app, self.history_limit).await?;
        self.audit
            .append(AuditEntry::new(
                actor,
                app,
                "history",
                format!("{} entries", entries.len()),
                AuditOutcome::Succeeded,
            ))
            .await?;

        Ok(Reply::History {
            app: app.to_owned(),
            entries,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn request_approval(
        &self,
        action: ApprovalAction,
        app: &str,
        environment: Environment,
        build: BuildNumber,
        actor: &str,
    ) -> ControlResult<Reply> {
        match self
            .gate
            .request_approval(action, app, environment, build, actor)
            .await
        {
            Ok(approval) => {
                self.audit
                    .append(AuditEntry::new(
                        actor,
                        app,
                        action.as_str(),
                        format!(
                            "#{build} to {environment} awaiting approval ({})",
                            approval.id
                        ),
                        AuditOutcome::Accepted,
                    ))
                    .await?;
                Ok(Reply::ApprovalPending { approval })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.refuse(
                    AuditEntry::new(
                        actor,
                        app,
                        action.as_str(),
                        format!("#{build} to {environment}: {e}"),
                        AuditOutcome::Failed,
                    ),
                    e,
                )
                .await
            }
        }
    }

    /// Most recent successful build in `environment` that is not the
    /// currently deployed one.
    ///
    /// Releases a rollback moved away from are dropped from the candidates,
    /// so repeated rollbacks keep walking back instead of returning to them.
    async fn rollback_target(&self, app: &str, environment: Environment) -> ControlResult<BuildNumber> {
        let records = self.store.deployments_for(app, environment).await?;
        let current = records.first().map(|r| r.build);

        let mut releases: Vec<BuildNumber> = Vec::new();
        for record in records.iter().rev() {
            match record.status {
                DeploymentStatus::Succeeded => releases.push(record.build),
                DeploymentStatus::RolledBack => {
                    match releases.iter().rposition(|b| *b == record.build) {
                        Some(pos) => releases.truncate(pos + 1),
                        None => {
                            releases.clear();
                            releases.push(record.build);
                        }
                    }
                }
                DeploymentStatus::Triggered | DeploymentStatus::Failed => {}
            }
        }

        releases
            .into_iter()
            .rev()
            .find(|b| Some(*b) != current)
            .ok_or_else(|| ControlError::NoRollbackTarget {
                app: app.to_owned(),
                environment,
            })
    }

    async fn dispatch_approved(
        &self,
        approval: &ApprovalRequest,
        actor: &str,
    ) -> ControlResult<DispatchOutcome> {
        match self
            .dispatch_release(
                approval.action,
                &approval.app,
                approval.environment,
                approval.build,
                actor,
                Some(approval.id.clone()),
            )
            .await
        {
            Ok(deployment) => Ok(DispatchOutcome::Dispatched { deployment }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(DispatchOutcome::Failed {
                error: e.to_string(),
            }),
        }
    }

    /// Call the release system, then record and audit what it accepted.
    ///
    /// Failures are audited before they are returned.
    async fn dispatch_release(
        &self,
        action: ApprovalAction,
        app: &str,
        environment: Environment,
        build: BuildNumber,
        actor: &str,
        approval_id: Option<ApprovalId>,
    ) -> ControlResult<DeploymentRecord> {
        let (result, status) = match action {
            ApprovalAction::Deploy => (
                self.releases.deploy(app, environment, build).await,
                DeploymentStatus::Triggered,
            ),
            ApprovalAction::Rollback => (
                self.releases.rollback(app, environment, build).await,
                DeploymentStatus::RolledBack,
            ),
        };

        let via = approval_id
            .as_ref()
            .map(|id| format!(" (approval {id})"))
            .unwrap_or_default();

        let external_id = match result {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    app = %app,
                    environment = %environment,
                    build = %build,
                    error = %e,
                    "{action} dispatch failed"
                );
                return self
                    .refuse(
                        AuditEntry::new(
                            actor,
                            app,
                            action.as_str(),
                            format!("#{build} to {environment}{via}: {e}"),
                            AuditOutcome::Failed,
                        ),
                        e,
                    )
                    .await;
            }
        };

        let mut record =
            DeploymentRecord::dispatched(app, environment, build, actor, external_id, status);
        if let Some(id) = approval_id {
            record = record.with_approval(id);
        }

        if let Err(e) = self.store.insert_deployment(record.clone()).await {
            return self
                .refuse(
                    AuditEntry::new(
                        actor,
                        app,
                        action.as_str(),
                        format!("#{build} to {environment}{via}: {e}"),
                        AuditOutcome::Failed,
                    ),
                    e,
                )
                .await;
        }

        tracing::info!(
            app = %app,
            environment = %environment,
            build = %build,
            deployment = %record.external_id,
            "{action} dispatched"
        );
        self.audit
            .append(AuditEntry::new(
                actor,
                app,
                action.as_str(),
                format!(
                    "#{build} to {environment} dispatched as {}{via}",
                    record.external_id
                ),
                AuditOutcome::Accepted,
            ))
            .await?;

        Ok(record)
    }

    /// Audit a refused action, then return its error.
    async fn refuse<T>(&self, entry: AuditEntry, error: ControlError) -> ControlResult<T> {
        self.audit.append(entry).await?;
        Err(error)
    }
}
