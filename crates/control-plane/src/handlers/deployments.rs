use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::handlers::projects::owned_project;
use crate::models::{Deployment, Project, User};
use crate::queue::DeployTask;
use crate::services::deployments;
use crate::AppState;

/// Load a deployment and its project, enforcing ownership through the
/// project.
async fn owned_deployment(state: &AppState, user: &User, id: Uuid) -> ApiResult<(Deployment, Project)> {
    let pool = state.pool()?;
    let deployment = deployments::get(pool, id)
        .await
        .map_err(|_| ApiError::not_found("deployment not found"))?;
    let project = owned_project(state, user, deployment.project_id).await?;
    Ok((deployment, project))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_deployments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::bad_request("limit must be in 1..=100"));
    }
    let project = owned_project(&state, &user, id).await?;
    let pool = state.pool()?;
    let rows = deployments::list_for_project(pool, project.id, limit).await?;
    Ok(Json(json!({"deployments": rows})))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deployment>> {
    let (deployment, _) = owned_deployment(&state, &user, id).await?;
    Ok(Json(deployment))
}

/// Cooperative cancel. Rejected once the row is past the working states.
pub async fn cancel_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let (deployment, _) = owned_deployment(&state, &user, id).await?;
    let pool = state.pool()?;
    if !deployments::cancel(pool, deployment.id).await? {
        return Err(ApiError::conflict("deployment cannot be cancelled"));
    }
    info!(deployment_id = %deployment.id, "deployment cancelled");
    Ok(Json(json!({"message": "deployment cancelled"})))
}

/// Rollback: re-release the already-built image of an older deployment. The
/// build phase is bypassed; promotion and supersession are the same as for a
/// fresh deploy.
pub async fn redeploy_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let (source, project) = owned_deployment(&state, &user, id).await?;
    let Some(image_tag) = source.image_tag.clone() else {
        return Err(ApiError::bad_request("deployment has no built image"));
    };
    let pool = state.pool()?;
    let queue = state.broker()?;

    let row = deployments::create_redeploy(pool, &source, &image_tag).await?;
    queue
        .enqueue_deploy(&DeployTask {
            deployment_id: row.id,
            project_id: project.id,
            project_slug: project.slug.clone(),
            image_tag,
            port: project.port,
            attempt: 0,
        })
        .await
        .map_err(|e| ApiError::internal(format!("failed to enqueue deploy: {e}")))?;

    info!(deployment_id = %row.id, source = %source.id, "redeploy enqueued");
    Ok((StatusCode::ACCEPTED, Json(json!({"deployment": row}))))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub tail: Option<usize>,
}

pub async fn deployment_logs(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<String> {
    let (deployment, _) = owned_deployment(&state, &user, id).await?;
    let Some(container_id) = deployment.container_id.as_deref() else {
        return Err(ApiError::not_found("deployment has no container"));
    };
    let engine = state.engine()?;
    let tail = query.tail.unwrap_or(100).min(10_000);
    engine
        .logs(container_id, tail)
        .await
        .map_err(|e| ApiError::upstream(format!("failed to read container logs: {e}")))
}
