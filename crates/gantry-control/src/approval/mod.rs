//! Approval gate for deployments to sensitive environments.
//!
//! At most one request may be pending per `(app, environment)` slot. A
//! pending request leaves the slot exactly once: resolved by an approver,
//! or expired by its timer. Both paths remove the slot under the same
//! map entry lock, so whichever runs second sees the slot gone and reports
//! the outcome of the first.
//!
//! Timers are keyed by [`ApprovalId`]. A timer only expires the request it
//! was started for, so a stale timer can never touch a newer request that
//! took over the same slot.
//!
//! Resolved requests are archived for lookups and `AlreadyResolved` replies.
//! Only the most recent ones are kept; older ones are forgotten and a late
//! decision for them reports `NotFound`.

pub mod state;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gantry_command::{BuildNumber, Environment};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditLog;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    ApprovalAction, ApprovalId, ApprovalRequest, ApprovalState, AuditEntry, AuditOutcome,
    Decision,
};

use self::state::{Approval, Pending, ResolvedApproval};

/// Resolved requests kept by [`ApprovalGate::new`].
pub const DEFAULT_RESOLVED_RETENTION: usize = 1000;

/// Notification sent by the gate to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A pending request reached its deadline without a decision.
    Expired(ApprovalRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    app: String,
    environment: Environment,
}

impl SlotKey {
    fn new(app: &str, environment: Environment) -> Self {
        Self {
            app: app.to_owned(),
            environment,
        }
    }
}

struct PendingSlot {
    approval: Approval<Pending>,
    deadline: Instant,
    cancel: CancellationToken,
}

/// Single-flight approval gate with expiry.
pub struct ApprovalGate {
    timeout: Duration,
    gated: Vec<Environment>,
    pending: DashMap<SlotKey, PendingSlot>,
    /// Recent requests that left `Pending`, by ID.
    resolved: DashMap<ApprovalId, ApprovalRequest>,
    /// IDs in `resolved`, oldest first.
    archive_order: Mutex<VecDeque<ApprovalId>>,
    retain_resolved: usize,
    /// The last request that left `Pending` per slot.
    last_resolved: DashMap<SlotKey, ApprovalId>,
    audit: Arc<dyn AuditLog>,
    events: mpsc::UnboundedSender<GateEvent>,
    shutdown: CancellationToken,
}

impl ApprovalGate {
    /// Create a gate and the receiver for its expiry notifications.
    ///
    /// `gated` lists the environments that need approval. QA is never gated.
    pub fn new(
        timeout: Duration,
        gated: Vec<Environment>,
        audit: Arc<dyn AuditLog>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<GateEvent>) {
        Self::with_retention(timeout, gated, audit, DEFAULT_RESOLVED_RETENTION)
    }

    /// Create a gate that keeps the `retain_resolved` most recently resolved
    /// requests.
    pub fn with_retention(
        timeout: Duration,
        gated: Vec<Environment>,
        audit: Arc<dyn AuditLog>,
        retain_resolved: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<GateEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let gated = gated
            .into_iter()
            .filter(|env| *env != Environment::Qa)
            .collect();

        let gate = Arc::new(Self {
            timeout,
            gated,
            pending: DashMap::new(),
            resolved: DashMap::new(),
            archive_order: Mutex::new(VecDeque::new()),
            retain_resolved: retain_resolved.max(1),
            last_resolved: DashMap::new(),
            audit,
            events,
            shutdown: CancellationToken::new(),
        });

        (gate, rx)
    }

    /// Whether deployments to `environment` need approval.
    #[must_use]
    pub fn is_gated(&self, environment: Environment) -> bool {
        self.gated.contains(&environment)
    }

    /// How long a request stays pending.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a pending request for `(app, environment)` and start its timer.
    ///
    /// Fails with `Conflict` while another request for the slot is pending.
    /// A pending request whose deadline has already passed is expired first
    /// and does not block the slot.
    pub async fn request_approval(
        self: &Arc<Self>,
        action: ApprovalAction,
        app: &str,
        environment: Environment,
        build: BuildNumber,
        requested_by: &str,
    ) -> ControlResult<ApprovalRequest> {
        if !self.is_gated(environment) {
            return Err(ControlError::internal(format!(
                "{environment} does not require approval"
            )));
        }

        let key = SlotKey::new(app, environment);
        let now = Instant::now();
        let created_at = Utc::now();
        let out_of_range =
            || ControlError::Config(format!("approval timeout {:?} is out of range", self.timeout));
        let deadline = now.checked_add(self.timeout).ok_or_else(out_of_range)?;
        let expires_at = chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| created_at.checked_add_signed(timeout))
            .ok_or_else(out_of_range)?;
        let request = ApprovalRequest {
            id: ApprovalId::generate(),
            action,
            app: app.to_owned(),
            environment,
            build,
            requested_by: requested_by.to_owned(),
            created_at,
            expires_at,
            state: ApprovalState::Pending,
            resolved_by: None,
            resolved_at: None,
        };
        let slot = PendingSlot {
            approval: Approval::create(request.clone()),
            deadline,
            cancel: self.shutdown.child_token(),
        };
        let cancel = slot.cancel.clone();

        let overdue = match self.pending.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if now < current.deadline {
                    return Err(ControlError::Conflict {
                        app: app.to_owned(),
                        environment,
                        pending: current.approval.id().clone(),
                    });
                }
                current.cancel.cancel();
                let expired = ResolvedApproval::Expired(current.approval.clone().expire());
                self.archive(&key, expired.request());
                occupied.insert(slot);
                Some(expired.into_request())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                None
            }
        };

        self.spawn_timer(key, request.id.clone(), deadline, cancel);

        tracing::info!(
            app = %app,
            environment = %environment,
            approval_id = %request.id,
            action = %action,
            "approval requested"
        );

        if let Some(expired) = overdue {
            self.announce_expiry(expired).await?;
        }

        Ok(request)
    }

    /// Resolve the pending request for `(app, environment)`.
    ///
    /// When `approval_id` is given it must name the pending request. A
    /// request whose deadline has passed is expired here and reported as
    /// `AlreadyResolved`, exactly as if its timer had fired first.
    pub async fn resolve(
        &self,
        app: &str,
        environment: Environment,
        decision: Decision,
        resolved_by: &str,
        approval_id: Option<&ApprovalId>,
    ) -> ControlResult<ApprovalRequest> {
        let key = SlotKey::new(app, environment);

        let Some(outcome) = self.close(&key, approval_id, |approval, overdue| {
            if overdue {
                ResolvedApproval::Expired(approval.expire())
            } else {
                approval.decide(decision, resolved_by)
            }
        }) else {
            return Err(self.missing(&key, approval_id));
        };

        if let ResolvedApproval::Expired(_) = outcome {
            self.announce_expiry(outcome.into_request()).await?;
            return Err(ControlError::AlreadyResolved {
                app: app.to_owned(),
                environment,
                state: ApprovalState::Expired,
            });
        }

        let request = outcome.into_request();
        tracing::info!(
            app = %app,
            environment = %environment,
            approval_id = %request.id,
            state = %request.state,
            resolved_by = %resolved_by,
            "approval resolved"
        );

        let outcome = match decision {
            Decision::Approve => AuditOutcome::Succeeded,
            Decision::Reject => AuditOutcome::Rejected,
        };
        self.audit
            .append(AuditEntry::new(
                resolved_by,
                app,
                format!("approval.{decision}"),
                describe(&request),
                outcome,
            ))
            .await?;

        Ok(request)
    }

    /// Requests that are still pending, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<_> = self
            .pending
            .iter()
            .map(|slot| slot.approval.request().clone())
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    /// Pending request for `(app, environment)`, if any.
    #[must_use]
    pub fn pending_for(&self, app: &str, environment: Environment) -> Option<ApprovalRequest> {
        self.pending
            .get(&SlotKey::new(app, environment))
            .map(|slot| slot.approval.request().clone())
    }

    /// Fetch any request, pending or resolved.
    #[must_use]
    pub fn get(&self, id: &ApprovalId) -> Option<ApprovalRequest> {
        if let Some(request) = self.resolved.get(id) {
            return Some(request.clone());
        }
        self.pending
            .iter()
            .find(|slot| slot.approval.id() == id)
            .map(|slot| slot.approval.request().clone())
    }

    /// Cancel every outstanding timer. Pending requests stay pending.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Remove the slot if it holds the expected request, resolving it with
    /// `finish` while the entry lock is still held.
    fn close(
        &self,
        key: &SlotKey,
        expected: Option<&ApprovalId>,
        finish: impl FnOnce(Approval<Pending>, bool) -> ResolvedApproval,
    ) -> Option<ResolvedApproval> {
        let Entry::Occupied(occupied) = self.pending.entry(key.clone()) else {
            return None;
        };

        let slot = occupied.get();
        if expected.is_some_and(|id| slot.approval.id() != id) {
            return None;
        }

        slot.cancel.cancel();
        let overdue = Instant::now() >= slot.deadline;
        let outcome = finish(slot.approval.clone(), overdue);
        self.archive(key, outcome.request());
        occupied.remove();

        Some(outcome)
    }

    fn archive(&self, key: &SlotKey, request: &ApprovalRequest) {
        self.resolved.insert(request.id.clone(), request.clone());
        self.last_resolved.insert(key.clone(), request.id.clone());

        let evicted: Vec<ApprovalId> = {
            let mut order = self
                .archive_order
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            order.push_back(request.id.clone());
            let excess = order.len().saturating_sub(self.retain_resolved);
            order.drain(..excess).collect()
        };

        for id in evicted {
            if let Some((_, old)) = self.resolved.remove(&id) {
                self.last_resolved
                    .remove_if(&SlotKey::new(&old.app, old.environment), |_, last| {
                        *last == id
                    });
            }
        }
    }

    /// Explain why no pending request matched.
    fn missing(&self, key: &SlotKey, approval_id: Option<&ApprovalId>) -> ControlError {
        let resolved_id = match approval_id {
            Some(id) => Some(id.clone()),
            None => self.last_resolved.get(key).map(|id| id.clone()),
        };

        let state = resolved_id
            .and_then(|id| self.resolved.get(&id).map(|r| r.clone()))
            .filter(|r| r.app == key.app && r.environment == key.environment)
            .map(|r| r.state);

        match state {
            Some(state) => ControlError::AlreadyResolved {
                app: key.app.clone(),
                environment: key.environment,
                state,
            },
            None => match approval_id {
                Some(id) => ControlError::not_found(format!(
                    "approval {id} for {}/{}",
                    key.app, key.environment
                )),
                None => ControlError::not_found(format!(
                    "pending approval for {}/{}",
                    key.app, key.environment
                )),
            },
        }
    }

    /// Audit an expiry and tell the orchestrator.
    async fn announce_expiry(&self, request: ApprovalRequest) -> ControlResult<()> {
        tracing::info!(
            app = %request.app,
            environment = %request.environment,
            approval_id = %request.id,
            "approval expired"
        );

        let audited = self
            .audit
            .append(AuditEntry::new(
                AuditEntry::SYSTEM_ACTOR,
                &request.app,
                "approval.expire",
                describe(&request),
                AuditOutcome::Expired,
            ))
            .await;

        if self.events.send(GateEvent::Expired(request)).is_err() {
            tracing::warn!("gate listener is gone, expiry not delivered");
        }

        audited
    }

    /// Timer body: expire the request if it still holds its slot.
    async fn fire(&self, key: SlotKey, id: ApprovalId) {
        let expired = self.close(&key, Some(&id), |approval, _| {
            ResolvedApproval::Expired(approval.expire())
        });

        let Some(expired) = expired else {
            tracing::debug!(approval_id = %id, "stale approval timer");
            return;
        };

        if let Err(e) = self.announce_expiry(expired.into_request()).await {
            tracing::error!(approval_id = %id, error = %e, "failed to audit approval expiry");
        }
    }

    fn spawn_timer(
        self: &Arc<Self>,
        key: SlotKey,
        id: ApprovalId,
        deadline: Instant,
        cancel: CancellationToken,
    ) {
        let gate: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    if let Some(gate) = gate.upgrade() {
                        gate.fire(key, id).await;
                    }
                }
            }
        });
    }
}

fn describe(request: &ApprovalRequest) -> String {
    format!(
        "{} {} #{} to {} requested by {} ({})",
        request.action,
        request.app,
        request.build,
        request.environment,
        request.requested_by,
        request.id
    )
}
