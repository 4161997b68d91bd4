//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Chat commands relayed by the chat adapter
//! - Build and deployment callbacks
//! - Approval decisions and pending requests
//! - Audit history
//! - Health and readiness checks
//! - Prometheus metrics

mod approvals;
mod callbacks;
mod commands;
mod deployments;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use gantry_command::Environment;
use serde::Serialize;

use crate::audit::AuditLog;
use crate::error::ControlError;
use crate::orchestrator::Orchestrator;

pub use approvals::{DecisionRequest, HistoryQuery};
pub use callbacks::{BuildCallbackRequest, BuildNumberField, DeploymentCallbackRequest};
pub use commands::{CommandRequest, CommandResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator every command, callback and decision goes through.
    pub orchestrator: Arc<Orchestrator>,
    /// Audit log for history queries and readiness.
    pub audit: Arc<dyn AuditLog>,
    /// Entries returned by `/history/{app}` when no limit is given.
    pub history_limit: usize,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Chat commands
        .route("/commands", post(commands::submit_command))
        // Callbacks
        .route("/callbacks/build", post(callbacks::build_completed))
        .route("/callbacks/deployment", post(callbacks::deployment_completed))
        // Deployments
        .route("/deployments/{id}", get(deployments::get_deployment))
        // Approvals
        .route("/approvals", get(approvals::list_pending))
        .route("/approvals/decision", post(approvals::decide))
        .route("/approvals/{id}", get(approvals::get_approval))
        // Audit
        .route("/history/{app}", get(approvals::history))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Machine-readable error kind.
    pub kind: &'static str,
}

/// Result type for JSON handlers.
type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Convert an engine error into an HTTP error response.
fn error_response(e: &ControlError) -> (StatusCode, Json<ErrorResponse>) {
    (
        error_to_status(e),
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind(),
        }),
    )
}

/// Convert a control error to an HTTP status code.
const fn error_to_status(e: &ControlError) -> StatusCode {
    match e {
        ControlError::Parse(_) | ControlError::Config(_) => StatusCode::BAD_REQUEST,
        ControlError::NotFound(_) => StatusCode::NOT_FOUND,
        ControlError::Conflict { .. } | ControlError::AlreadyResolved { .. } => {
            StatusCode::CONFLICT
        }
        ControlError::NoRollbackTarget { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::Client { .. } | ControlError::Http(_) => StatusCode::BAD_GATEWAY,
        ControlError::Audit(_) | ControlError::Database(_) | ControlError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
///
/// Ready when the audit log answers, since no action may complete without it.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let pending_approvals = state.orchestrator.gate().pending().len();

    match state.audit.history("", 1).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                pending_approvals,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "audit log not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    pending_approvals,
                }),
            )
        }
    }
}

/// Metrics endpoint.
async fn metrics(State(state): State<AppState>) -> String {
    let gate = state.orchestrator.gate();
    let pending = gate.pending();
    let mut output = String::new();

    output.push_str("# HELP gantry_pending_approvals Approval requests awaiting a decision\n");
    output.push_str("# TYPE gantry_pending_approvals gauge\n");
    for environment in Environment::ALL {
        if !gate.is_gated(environment) {
            continue;
        }
        let count = pending
            .iter()
            .filter(|a| a.environment == environment)
            .count();
        let _ = writeln!(
            output,
            "gantry_pending_approvals{{environment=\"{environment}\"}} {count}"
        );
    }

    output.push_str("# HELP gantry_approval_timeout_seconds Seconds before a pending approval expires\n");
    output.push_str("# TYPE gantry_approval_timeout_seconds gauge\n");
    let _ = writeln!(
        output,
        "gantry_approval_timeout_seconds {}",
        gate.timeout().as_secs()
    );

    output
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    pending_approvals: usize,
}
