//! Callback endpoints for build and release system notifications.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::{info, warn};

use crate::orchestrator::{ControlEvent, EventOutcome};
use crate::types::{BuildStatus, DeploymentStatus, ExternalBuildId, ExternalDeploymentId};

use super::{error_response, ApiResult, AppState, ErrorResponse};

/// Build number as the build system sends it: a JSON number or a string,
/// optionally prefixed with `#`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BuildNumberField {
    /// `42`
    Number(u64),
    /// `"42"` or `"#42"`
    Text(String),
}

impl From<BuildNumberField> for ExternalBuildId {
    fn from(field: BuildNumberField) -> Self {
        match field {
            BuildNumberField::Number(n) => Self::new(n.to_string()),
            BuildNumberField::Text(s) => Self::new(s.trim().trim_start_matches('#')),
        }
    }
}

/// Request from the build system when a build finishes.
#[derive(Debug, Deserialize)]
pub struct BuildCallbackRequest {
    /// Application name the build was submitted for.
    pub app: String,
    /// Build system identifier.
    pub build_number: BuildNumberField,
    /// Result as the build system names it (`SUCCESS`, `FAILURE`, ...).
    pub status: String,
    /// Link to the build.
    #[serde(default)]
    pub url: Option<String>,
}

/// Request from the release system when a deployment finishes.
#[derive(Debug, Deserialize)]
pub struct DeploymentCallbackRequest {
    /// Release system identifier.
    pub deployment_id: ExternalDeploymentId,
    /// Result as the release system names it (`Success`, `Failed`, ...).
    pub status: String,
}

/// Handle a build completion callback.
pub async fn build_completed(
    State(state): State<AppState>,
    Json(request): Json<BuildCallbackRequest>,
) -> ApiResult<EventOutcome> {
    let build_id = ExternalBuildId::from(request.build_number);
    info!(
        app = %request.app,
        build = %build_id,
        status = %request.status,
        "received build callback"
    );

    state
        .orchestrator
        .dispatch(ControlEvent::BuildCallback {
            app: request.app,
            build_id,
            status: BuildStatus::from_result(&request.status),
            url: request.url,
        })
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Handle a deployment completion callback.
pub async fn deployment_completed(
    State(state): State<AppState>,
    Json(request): Json<DeploymentCallbackRequest>,
) -> ApiResult<EventOutcome> {
    info!(
        deployment = %request.deployment_id,
        status = %request.status,
        "received deployment callback"
    );

    let Some(status) = DeploymentStatus::from_result(&request.status) else {
        warn!(
            deployment = %request.deployment_id,
            status = %request.status,
            "deployment callback without a final status"
        );
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("`{}` is not a final deployment status", request.status),
                kind: "invalid_status",
            }),
        ));
    };

    state
        .orchestrator
        .dispatch(ControlEvent::DeploymentCallback {
            deployment_id: request.deployment_id,
            status,
        })
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::api::tests::{body_json, make_app_state, send};

    #[test]
    fn build_number_accepts_numbers_and_strings() {
        let ids: Vec<ExternalBuildId> = [json!(42), json!("42"), json!("#42")]
            .into_iter()
            .map(|v| serde_json::from_value::<BuildNumberField>(v).unwrap().into())
            .collect();
        assert!(ids.iter().all(|id| id.as_str() == "42"));
    }

    #[tokio::test]
    async fn build_callback_is_applied_once() {
        let app = make_app_state();
        app.state
            .orchestrator
            .handle_message("build myapp main", "alice")
            .await
            .unwrap();

        let body = json!({
            "app": "myapp",
            "build_number": 42,
            "status": "SUCCESS",
            "url": "https://ci.example.com/job/build-pipeline/42/"
        });

        let first = send(&app.state, "POST", "/callbacks/build", Some(body.clone())).await;
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;
        assert_eq!(first["event"], "build");
        assert_eq!(first["applied"], true);
        assert_eq!(first["build"]["status"], "succeeded");

        let second = send(&app.state, "POST", "/callbacks/build", Some(body)).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_json(second).await["applied"], false);
    }

    #[tokio::test]
    async fn callback_for_unknown_build_is_not_found() {
        let app = make_app_state();
        let response = send(
            &app.state,
            "POST",
            "/callbacks/build",
            Some(json!({"app": "myapp", "build_number": "7", "status": "FAILURE"})),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.audit.entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deployment_callback_completes_record() {
        let app = make_app_state();
        let reply = app
            .state
            .orchestrator
            .handle_message("deploy myapp 42 qa", "alice")
            .await
            .unwrap();
        let crate::orchestrator::Reply::DeploymentTriggered { deployment } = reply else {
            panic!("qa deploys are not gated");
        };

        let response = send(
            &app.state,
            "POST",
            "/callbacks/deployment",
            Some(json!({
                "deployment_id": deployment.external_id.as_str(),
                "status": "Success"
            })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["applied"], true);
        assert_eq!(body["deployment"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn deployment_callback_needs_final_status() {
        let app = make_app_state();
        let response = send(
            &app.state,
            "POST",
            "/callbacks/deployment",
            Some(json!({"deployment_id": "Deployments-1", "status": "Executing"})),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.audit.entries().unwrap().is_empty());
    }
}
