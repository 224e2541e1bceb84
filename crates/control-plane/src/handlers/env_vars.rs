use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::handlers::projects::owned_project;
use crate::models::{EnvVarDisplay, User};
use crate::services::{env_vars, projects};
use crate::AppState;

pub async fn list_env_vars(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = owned_project(&state, &user, id).await?;
    let pool = state.pool()?;
    let vars = env_vars::list(pool, project.id).await?;
    let display: Vec<EnvVarDisplay> = vars.iter().map(|v| v.to_display()).collect();
    Ok(Json(json!({"env_vars": display})))
}

#[derive(Deserialize)]
pub struct UpsertEnvVarRequest {
    pub key: String,
    pub value: String,
}

/// Upsert; the value is sealed before it touches the store and comes back
/// masked.
pub async fn upsert_env_var(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertEnvVarRequest>,
) -> ApiResult<(StatusCode, Json<EnvVarDisplay>)> {
    let project = owned_project(&state, &user, id).await?;
    if !projects::is_valid_env_key(&req.key) {
        return Err(ApiError::bad_request("key must match ^[A-Za-z][A-Za-z0-9_]{0,254}$"));
    }
    let sealed = state
        .sealer
        .seal(&req.value)
        .map_err(|_| ApiError::internal("failed to seal value"))?;
    let pool = state.pool()?;
    let var = env_vars::upsert(pool, project.id, &req.key, &sealed).await?;
    Ok((StatusCode::CREATED, Json(var.to_display())))
}

pub async fn delete_env_var(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((id, key)): Path<(Uuid, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = owned_project(&state, &user, id).await?;
    let pool = state.pool()?;
    if !env_vars::delete(pool, project.id, &key).await? {
        return Err(ApiError::not_found("env var not found"));
    }
    Ok(Json(json!({"message": "env var deleted"})))
}
