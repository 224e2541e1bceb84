use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{Project, User};
use crate::runtime::{detect, RepoProbe};
use crate::services::projects::{self, CreateProjectError, NewProject, ProjectPatch};
use crate::services::{deployments, users};
use crate::{github, AppState};

/// Load a project and enforce ownership. 404 before 403 so the existence of
/// other users' projects is not leaked.
pub(crate) async fn owned_project(state: &AppState, user: &User, id: Uuid) -> ApiResult<Project> {
    let pool = state.pool()?;
    let project = projects::get_by_id(pool, id)
        .await
        .map_err(|_| ApiError::not_found("project not found"))?;
    if project.user_id != user.id {
        return Err(ApiError::forbidden("access denied"));
    }
    Ok(project)
}

#[derive(Deserialize)]
pub struct ListReposQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

pub async fn list_repos(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListReposQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if query.page_size > 100 {
        return Err(ApiError::bad_request("page_size must be at most 100"));
    }
    let pool = state.pool()?;
    let token = users::access_token(pool, &state.sealer, user.id)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load access token: {e}")))?;
    let repos = github::Client::new(token)
        .list_deployable_repos(query.page, query.page_size)
        .await
        .map_err(|e| {
            error!(error = %e, "repo listing failed");
            ApiError::upstream("failed to list repositories")
        })?;
    Ok(Json(json!({"repos": repos, "page": query.page.max(1)})))
}

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<serde_json::Value>> {
    let pool = state.pool()?;
    let projects = projects::list_by_user(pool, user.id).await?;
    Ok(Json(json!({"projects": projects})))
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub repo_full_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub root_directory: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub port: Option<i32>,
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let pool = state.pool()?;
    let (owner, repo_name) = github::parse_repo_full_name(&req.repo_full_name)
        .map_err(|_| ApiError::bad_request("invalid repo full name"))?;

    if let Some(port) = req.port {
        if !(1..=65535).contains(&port) {
            return Err(ApiError::bad_request("port must be in 1..=65535"));
        }
    }
    if let Some(slug) = req.slug.as_deref() {
        if !projects::is_valid_slug(slug) {
            return Err(ApiError::bad_request("slug must match ^[a-z][a-z0-9-]{0,49}$"));
        }
    }

    let token = users::access_token(pool, &state.sealer, user.id)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load access token: {e}")))?;
    let client = github::Client::new(token);

    let repo = match client.get_repo(owner, repo_name).await {
        Ok(repo) => repo,
        Err(github::GithubError::RepoNotFound(_)) => {
            return Err(ApiError::bad_request("failed to access repository"));
        }
        Err(e) => {
            error!(error = %e, repo = %req.repo_full_name, "repo lookup failed");
            return Err(ApiError::upstream("failed to reach source host"));
        }
    };

    if projects::get_by_repo_full_name(pool, &req.repo_full_name).await?.is_some() {
        return Err(ApiError::bad_request("project for this repo already exists"));
    }

    let name = req.name.filter(|n| !n.is_empty()).unwrap_or_else(|| repo.name.clone());
    let branch = req.branch.filter(|b| !b.is_empty()).unwrap_or_else(|| repo.default_branch.clone());
    let root_directory = req.root_directory.filter(|r| !r.is_empty()).unwrap_or_else(|| ".".to_string());

    let slug = match req.slug {
        Some(slug) => slug,
        None => {
            let derived = projects::slugify(&name);
            if projects::is_valid_slug(&derived) {
                derived
            } else {
                format!("app-{}", projects::random_suffix())
            }
        }
    };

    let probe = RepoProbe::new(&client, owner, repo_name, &branch, &root_directory);
    let profile = detect(&probe).await;

    let build_command = req.build_command.or_else(|| profile.build_command.clone());
    let start_command = req.start_command.or_else(|| profile.start_command.clone());
    let port = req.port.unwrap_or(profile.port);

    // Webhook wiring is best-effort: a failure leaves the project without
    // automatic deploys, it does not roll back creation.
    let webhook_secret = github::generate_webhook_secret();
    let webhook = match client
        .create_webhook(owner, repo_name, &state.cfg.webhook_callback_url(), &webhook_secret)
        .await
    {
        Ok(hook) => Some(hook),
        Err(e) => {
            warn!(error = %e, repo = %req.repo_full_name, "webhook creation failed, continuing");
            None
        }
    };

    let input = NewProject {
        user_id: user.id,
        name,
        slug,
        repo_full_name: req.repo_full_name.clone(),
        repo_url: repo.clone_url.clone(),
        branch,
        root_directory,
        build_command,
        start_command,
        runtime: Some(profile.runtime.as_str().to_string()),
        port,
    };
    let project = match projects::create(pool, &input).await {
        Ok(project) => project,
        Err(CreateProjectError::RepoTaken) => {
            return Err(ApiError::bad_request("project for this repo already exists"));
        }
        Err(CreateProjectError::SlugExhausted) => {
            return Err(ApiError::conflict("could not allocate a unique slug"));
        }
        Err(CreateProjectError::Db(e)) => return Err(e.into()),
    };

    if let Some(hook) = webhook {
        match state.sealer.seal(&webhook_secret) {
            Ok(sealed) => {
                if let Err(e) = projects::set_webhook(pool, project.id, hook.id, &sealed).await {
                    error!(project_id = %project.id, error = %e, "failed to store webhook info");
                }
            }
            Err(e) => error!(project_id = %project.id, error = %e, "failed to seal webhook secret"),
        }
    }

    info!(project_id = %project.id, repo = %project.repo_full_name, runtime = %profile.runtime.as_str(), "project created");
    Ok((StatusCode::CREATED, Json(json!({"project": project, "runtime_info": profile}))))
}

pub async fn get_project(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = owned_project(&state, &user, id).await?;
    let pool = state.pool()?;
    let live = deployments::live_for_project(pool, project.id).await?;
    Ok(Json(json!({"project": project, "live_deployment": live})))
}

#[derive(Deserialize, Default)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub root_directory: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub runtime: Option<String>,
    pub port: Option<i32>,
}

pub async fn update_project(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult<Json<Project>> {
    let project = owned_project(&state, &user, id).await?;
    if let Some(port) = req.port {
        if !(1..=65535).contains(&port) {
            return Err(ApiError::bad_request("port must be in 1..=65535"));
        }
    }
    if let Some(name) = req.name.as_deref() {
        if name.is_empty() {
            return Err(ApiError::bad_request("name must not be empty"));
        }
    }
    let pool = state.pool()?;
    let patch = ProjectPatch {
        name: req.name,
        branch: req.branch,
        root_directory: req.root_directory,
        build_command: req.build_command,
        start_command: req.start_command,
        runtime: req.runtime,
        port: req.port,
    };
    let updated = projects::update(pool, project.id, &patch).await?;
    Ok(Json(updated))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = owned_project(&state, &user, id).await?;
    let pool = state.pool()?;

    // Best-effort webhook teardown on the source host.
    if let Some(webhook_id) = project.webhook_id {
        if let Ok(token) = users::access_token(pool, &state.sealer, user.id).await {
            if let Ok((owner, repo_name)) = github::parse_repo_full_name(&project.repo_full_name) {
                if let Err(e) = github::Client::new(token).delete_webhook(owner, repo_name, webhook_id).await {
                    warn!(project_id = %project.id, error = %e, "webhook teardown failed");
                }
            }
        }
    }

    // Deployments and env vars cascade with the row.
    projects::delete(pool, project.id).await?;
    info!(project_id = %project.id, repo = %project.repo_full_name, "project deleted");
    Ok(Json(json!({"message": "project deleted"})))
}
