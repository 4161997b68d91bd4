//! Deployment record lookup.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::types::{DeploymentRecord, ExternalDeploymentId};

use super::{error_response, ApiResult, AppState};

/// Get a deployment or rollback record by release system ID.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeploymentRecord> {
    state
        .orchestrator
        .deployment(&ExternalDeploymentId::new(id))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::tests::{body_json, make_app_state, send};

    #[tokio::test]
    async fn lookup_follows_callback() {
        let app = make_app_state();
        let triggered = body_json(
            send(
                &app.state,
                "POST",
                "/commands",
                Some(json!({"text": "deploy myapp 42 qa", "actor": "alice"})),
            )
            .await,
        )
        .await;
        let id = triggered["reply"]["deployment"]["external_id"]
            .as_str()
            .unwrap()
            .to_owned();

        let uri = format!("/deployments/{id}");
        let before = body_json(send(&app.state, "GET", &uri, None).await).await;
        assert_eq!(before["status"], "triggered");
        assert_eq!(before["build"], 42);

        send(
            &app.state,
            "POST",
            "/callbacks/deployment",
            Some(json!({"deployment_id": id, "status": "Failed"})),
        )
        .await;

        let after = body_json(send(&app.state, "GET", &uri, None).await).await;
        assert_eq!(after["status"], "failed");
    }

    #[tokio::test]
    async fn unknown_deployment_is_not_found() {
        let app = make_app_state();
        let response = send(&app.state, "GET", "/deployments/Deployments-404", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["kind"], "not_found");
    }
}
