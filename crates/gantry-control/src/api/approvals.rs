//! Approval decision and audit history endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use gantry_command::Environment;
use serde::Deserialize;
use tracing::info;

use crate::error::ControlError;
use crate::orchestrator::DecisionOutcome;
use crate::types::{ApprovalId, ApprovalRequest, AuditEntry, Decision};

use super::{error_response, ApiResult, AppState};

/// An approver's answer to a pending request.
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    /// Application name.
    pub app: String,
    /// Gated environment.
    pub environment: Environment,
    /// Approve or reject.
    pub decision: Decision,
    /// Approver.
    pub actor: String,
    /// Request the approver saw. When given, a newer request in the same
    /// slot is left alone.
    #[serde(default)]
    pub approval_id: Option<ApprovalId>,
}

/// Query parameters for history.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of entries.
    pub limit: Option<usize>,
}

/// Resolve a pending request and dispatch it when approved.
pub async fn decide(
    State(state): State<AppState>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<DecisionOutcome> {
    info!(
        app = %request.app,
        environment = %request.environment,
        decision = %request.decision,
        actor = %request.actor,
        "received approval decision"
    );

    state
        .orchestrator
        .handle_approval_decision(
            &request.app,
            request.environment,
            request.decision,
            &request.actor,
            request.approval_id.as_ref(),
        )
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// List pending requests, oldest first.
pub async fn list_pending(State(state): State<AppState>) -> Json<Vec<ApprovalRequest>> {
    Json(state.orchestrator.gate().pending())
}

/// Get a request by ID, pending or resolved.
pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApprovalRequest> {
    state
        .orchestrator
        .gate()
        .get(&ApprovalId::new(id.as_str()))
        .map(Json)
        .ok_or_else(|| error_response(&ControlError::not_found(format!("approval {id}"))))
}

/// Audit trail of an app, newest first.
pub async fn history(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<AuditEntry>> {
    let limit = query.limit.unwrap_or(state.history_limit);
    state
        .audit
        .history(&app, limit)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}
