//! Webhook intake.
//!
//! The project lookup precedes signature verification because the secret is
//! per-project, but nothing is mutated before the signature checks out.
//! Gated-out pushes answer 200 so the source host does not retry them.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::queue::BuildTask;
use crate::services::{deployments, projects};
use crate::webhooks::{verify_signature, PushEvent, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use crate::AppState;

fn header<'h>(headers: &'h HeaderMap, name: &str) -> &'h str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let event_type = header(&headers, EVENT_HEADER);
    let delivery_id = header(&headers, DELIVERY_HEADER);
    info!(event = event_type, delivery_id, body_size = body.len(), "webhook received");

    if event_type != "push" {
        debug!(event = event_type, "ignoring non-push event");
        return Ok((StatusCode::OK, Json(json!({"message": "event ignored"}))));
    }

    let event = PushEvent::parse(&body).map_err(|_| ApiError::bad_request("invalid push event"))?;

    let pool = state.pool()?;
    let Some(project) = projects::get_by_repo_full_name(pool, &event.repository.full_name).await? else {
        warn!(repo = %event.repository.full_name, "no project for repository");
        return Ok((StatusCode::OK, Json(json!({"message": "no associated project"}))));
    };

    let Some(secret_sealed) = project.webhook_secret_sealed.as_deref().filter(|s| !s.is_empty()) else {
        warn!(project_id = %project.id, "project has no webhook secret");
        return Err(ApiError::signature("unauthorized"));
    };
    let secret = state
        .sealer
        .open(secret_sealed)
        .map_err(|_| ApiError::internal("failed to unseal webhook secret"))?;

    if let Err(e) = verify_signature(&body, header(&headers, SIGNATURE_HEADER), &secret) {
        warn!(project_id = %project.id, error = %e, "webhook signature rejected");
        return Err(ApiError::signature("unauthorized"));
    }

    if !event.should_deploy() {
        debug!(project_id = %project.id, "push does not meet deployment criteria");
        return Ok((StatusCode::OK, Json(json!({"message": "push does not trigger deployment"}))));
    }

    let push_branch = event.branch().to_string();
    if push_branch != project.branch {
        debug!(project_id = %project.id, push_branch = %push_branch, configured = %project.branch, "branch skipped");
        return Ok((StatusCode::OK, Json(json!({"message": "branch skipped", "branch": push_branch}))));
    }

    let (commit_sha, commit_message, commit_author) = event.commit_info();
    let deployment = deployments::create(
        pool,
        &deployments::NewDeployment {
            project_id: project.id,
            commit_sha: commit_sha.clone(),
            commit_message: Some(commit_message),
            commit_author: Some(commit_author),
            branch: Some(push_branch.clone()),
        },
    )
    .await?;
    info!(
        deployment_id = %deployment.id,
        project_id = %project.id,
        commit = %&commit_sha[..8.min(commit_sha.len())],
        branch = %push_branch,
        "deployment created from push"
    );

    let queue = state.broker()?;
    queue
        .enqueue_build(&BuildTask {
            deployment_id: deployment.id,
            project_id: project.id,
            commit_sha: commit_sha.clone(),
            branch: push_branch.clone(),
            repo_clone_url: project.repo_url.clone(),
            root_directory: project.root_directory.clone(),
            build_command: project.build_command.clone(),
            start_command: project.start_command.clone(),
            runtime: project.runtime.clone(),
            port: project.port,
            attempt: 0,
        })
        .await
        .map_err(|e| ApiError::internal(format!("failed to enqueue build: {e}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "deployment created",
            "deployment_id": deployment.id,
            "commit": commit_sha,
            "branch": push_branch,
        })),
    ))
}
